use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Age classification used to select child-safety system prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AgeGroup {
    Child,
    Teen,
    Adult,
    Unknown,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub twofa_enabled: bool,
    #[serde(skip_serializing)]
    pub twofa_secret: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub failed_login_attempts: i32,
    pub account_locked_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub session_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    /// Current age in whole years, if a date of birth is known.
    pub fn age(&self) -> Option<i32> {
        let dob = self.date_of_birth?;
        let today = Utc::now().date_naive();
        let mut age = today.year() - dob.year();
        if (today.month(), today.day()) < (dob.month(), dob.day()) {
            age -= 1;
        }
        Some(age)
    }

    /// Classify the user for age-based safety prompts.
    /// child < 12, teen < 18, adult otherwise, unknown without a DOB.
    pub fn age_group(&self) -> AgeGroup {
        match self.age() {
            None => AgeGroup::Unknown,
            Some(age) if age < 12 => AgeGroup::Child,
            Some(age) if age < 18 => AgeGroup::Teen,
            Some(_) => AgeGroup::Adult,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub date_of_birth: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub date_of_birth: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginUser {
    pub username: String,
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_dob(dob: Option<NaiveDate>) -> User {
        User {
            id: 1,
            username: "test".into(),
            email: "test@example.com".into(),
            password_hash: String::new(),
            is_active: true,
            is_admin: false,
            twofa_enabled: false,
            twofa_secret: None,
            date_of_birth: dob,
            failed_login_attempts: 0,
            account_locked_until: None,
            session_token: None,
            created_at: Utc::now(),
            last_login: None,
        }
    }

    #[test]
    fn test_age_group_unknown_without_dob() {
        assert_eq!(user_with_dob(None).age_group(), AgeGroup::Unknown);
    }

    #[test]
    fn test_age_group_child() {
        let dob = Utc::now().date_naive() - chrono::Duration::days(8 * 366);
        assert_eq!(user_with_dob(Some(dob)).age_group(), AgeGroup::Child);
    }

    #[test]
    fn test_age_group_teen() {
        let dob = Utc::now().date_naive() - chrono::Duration::days(15 * 366);
        assert_eq!(user_with_dob(Some(dob)).age_group(), AgeGroup::Teen);
    }

    #[test]
    fn test_age_group_adult() {
        let dob = Utc::now().date_naive() - chrono::Duration::days(30 * 366);
        assert_eq!(user_with_dob(Some(dob)).age_group(), AgeGroup::Adult);
    }
}
