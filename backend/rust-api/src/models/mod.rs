pub mod inquiry;
pub mod payment;
pub mod session;
pub mod student;
pub mod tutor;
pub mod user;

pub use inquiry::{InquiryStatus, TutorInquiry};
pub use payment::{PaymentStatus, PaymentType, StudentPayment, ValidityStatus};
pub use session::{SessionStatus, TutoringSession};
pub use student::{HireRecord, HireStatus, StudentProfile};
pub use tutor::{AcademicLevelTaught, TutorProfile};
pub use user::{User, UserRole};
