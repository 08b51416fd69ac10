// Entity Models - the records the cooperative keeps
//
// Each entity has:
// - A stable integer id (foreign keys) and a human code (M-000001, SA-000001, LN-000001)
// - A status enum stored as TEXT
// - Persistence functions that take `&Connection` and record an audit event

pub mod member;
pub mod savings;
pub mod loan;
pub mod user;

pub use member::{Member, MemberStatus, MemberUpdate, NewMember};
pub use savings::{AccountStatus, SavingsAccount};
pub use loan::{Installment, Loan, LoanStatus};
pub use user::{NewUser, Permission, Role, User};
