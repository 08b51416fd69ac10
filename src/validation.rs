// 📐 Validation - field-level checks for every record that enters the books
//
// Every validator collects ALL problems instead of stopping at the first one,
// so a form (CLI or TUI) can show the complete list back to the clerk.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::config::LoanPolicy;
use crate::entities::member::NewMember;
use crate::entities::user::NewUser;
use crate::loans::LoanApplication;

pub const MIN_PASSWORD_LENGTH: usize = 8;

// ============================================================================
// VALIDATION ERROR
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub context: String,
}

impl ValidationError {
    pub(crate) fn new(context: &str, field: &str, message: impl Into<String>) -> Self {
        ValidationError {
            field: field.to_string(),
            message: message.into(),
            context: context.to_string(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.context, self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), Vec<ValidationError>>;

fn finish(errors: Vec<ValidationError>) -> ValidationResult {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

// ============================================================================
// MEMBER
// ============================================================================

pub fn validate_member(member: &NewMember) -> ValidationResult {
    const CTX: &str = "Member";
    let mut errors = Vec::new();

    if member.first_name.trim().is_empty() {
        errors.push(ValidationError::new(CTX, "first_name", "Required field is empty"));
    }

    if member.last_name.trim().is_empty() {
        errors.push(ValidationError::new(CTX, "last_name", "Required field is empty"));
    }

    if let Some(email) = &member.email {
        if !is_plausible_email(email) {
            errors.push(ValidationError::new(
                CTX,
                "email",
                format!("'{}' is not a valid email address", email),
            ));
        }
    }

    if !member.contact_number.is_empty()
        && !member
            .contact_number
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')'))
    {
        errors.push(ValidationError::new(
            CTX,
            "contact_number",
            "Only digits, spaces and + - ( ) are allowed",
        ));
    }

    if let Some(birth_date) = member.birth_date {
        if birth_date >= member.join_date {
            errors.push(ValidationError::new(
                CTX,
                "birth_date",
                "Must be before the membership date",
            ));
        } else if years_between(birth_date, member.join_date) < 18 {
            errors.push(ValidationError::new(
                CTX,
                "birth_date",
                "Member must be at least 18 years old at joining",
            ));
        }
    }

    finish(errors)
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

fn years_between(from: NaiveDate, to: NaiveDate) -> i32 {
    use chrono::Datelike;
    let mut years = to.year() - from.year();
    if (to.month(), to.day()) < (from.month(), from.day()) {
        years -= 1;
    }
    years
}

// ============================================================================
// LOAN APPLICATION
// ============================================================================

pub fn validate_loan_application(app: &LoanApplication, policy: &LoanPolicy) -> ValidationResult {
    const CTX: &str = "LoanApplication";
    let mut errors = Vec::new();

    if app.principal <= Decimal::ZERO {
        errors.push(ValidationError::new(CTX, "principal", "Must be greater than zero"));
    }

    if app.annual_rate < Decimal::ZERO || app.annual_rate > Decimal::ONE {
        errors.push(ValidationError::new(
            CTX,
            "annual_rate",
            format!("Must be between 0 and 1, got {}", app.annual_rate),
        ));
    }

    if app.term_months == 0 {
        errors.push(ValidationError::new(CTX, "term_months", "Must be at least one month"));
    } else if app.term_months > policy.max_term_months {
        errors.push(ValidationError::new(
            CTX,
            "term_months",
            format!("Cannot exceed {} months", policy.max_term_months),
        ));
    }

    if app.purpose.trim().is_empty() {
        errors.push(ValidationError::new(CTX, "purpose", "Required field is empty"));
    }

    finish(errors)
}

// ============================================================================
// USER
// ============================================================================

pub fn validate_new_user(user: &NewUser) -> ValidationResult {
    const CTX: &str = "User";
    let mut errors = Vec::new();

    let username = user.username.trim();
    if username.len() < 3 {
        errors.push(ValidationError::new(CTX, "username", "Must be at least 3 characters"));
    } else if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        errors.push(ValidationError::new(
            CTX,
            "username",
            "Only letters, digits and . _ - are allowed",
        ));
    }

    if user.full_name.trim().is_empty() {
        errors.push(ValidationError::new(CTX, "full_name", "Required field is empty"));
    }

    errors.extend(password_errors(&user.password));

    finish(errors)
}

pub fn validate_password(password: &str) -> ValidationResult {
    finish(password_errors(password))
}

fn password_errors(password: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.push(ValidationError::new(
            "User",
            "password",
            format!("Must be at least {} characters", MIN_PASSWORD_LENGTH),
        ));
    }

    if !password.chars().any(|c| c.is_ascii_digit()) || !password.chars().any(|c| c.is_alphabetic()) {
        errors.push(ValidationError::new(
            "User",
            "password",
            "Must contain both letters and digits",
        ));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amortization::InterestMethod;
    use crate::entities::user::Role;
    use rust_decimal_macros::dec;

    fn create_test_member() -> NewMember {
        NewMember {
            first_name: "Maria".to_string(),
            middle_name: Some("Santos".to_string()),
            last_name: "Dela Cruz".to_string(),
            birth_date: NaiveDate::from_ymd_opt(1985, 4, 12),
            address: "Purok 3, Brgy. San Isidro".to_string(),
            contact_number: "+63 917-555-0101".to_string(),
            email: Some("maria@example.com".to_string()),
            join_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
        }
    }

    fn create_test_application() -> LoanApplication {
        LoanApplication {
            member_id: 1,
            principal: dec!(20000),
            annual_rate: dec!(0.12),
            term_months: 12,
            method: InterestMethod::Diminishing,
            purpose: "Sari-sari store capital".to_string(),
            applied_on: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        }
    }

    #[test]
    fn test_validate_member_valid() {
        assert!(validate_member(&create_test_member()).is_ok());
    }

    #[test]
    fn test_validate_member_collects_all_errors() {
        let mut member = create_test_member();
        member.first_name = "  ".to_string();
        member.last_name = String::new();
        member.email = Some("not-an-email".to_string());

        let errors = validate_member(&member).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.field == "first_name"));
        assert!(errors.iter().any(|e| e.field == "last_name"));
        assert!(errors.iter().any(|e| e.field == "email"));
    }

    #[test]
    fn test_validate_member_underage() {
        let mut member = create_test_member();
        member.birth_date = NaiveDate::from_ymd_opt(2010, 1, 1);

        let errors = validate_member(&member).unwrap_err();
        assert_eq!(errors[0].field, "birth_date");
        assert!(errors[0].message.contains("18"));
    }

    #[test]
    fn test_validate_member_bad_contact_number() {
        let mut member = create_test_member();
        member.contact_number = "call me".to_string();

        let errors = validate_member(&member).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "contact_number"));
    }

    #[test]
    fn test_validate_loan_application_limits() {
        let policy = LoanPolicy::default();
        assert!(validate_loan_application(&create_test_application(), &policy).is_ok());

        let mut app = create_test_application();
        app.principal = Decimal::ZERO;
        app.term_months = policy.max_term_months + 1;
        app.annual_rate = dec!(1.5);

        let errors = validate_loan_application(&app, &policy).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["principal", "annual_rate", "term_months"]);
    }

    #[test]
    fn test_validate_new_user_password_rules() {
        let mut user = NewUser {
            username: "teller.one".to_string(),
            full_name: "Teller One".to_string(),
            role: Role::Teller,
            password: "secret".to_string(),
        };

        let errors = validate_new_user(&user).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.field == "password"));

        user.password = "counter2024".to_string();
        assert!(validate_new_user(&user).is_ok());
    }

    #[test]
    fn test_validate_new_user_username_charset() {
        let user = NewUser {
            username: "bad name!".to_string(),
            full_name: "Someone".to_string(),
            role: Role::Viewer,
            password: "viewer2024".to_string(),
        };

        let errors = validate_new_user(&user).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "username");
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::new("Member", "email", "bad");
        assert_eq!(err.to_string(), "[Member] email: bad");
    }
}
