use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    /// Accepts the stored lowercase form plus the upper-case and "faculty"
    /// spellings older clients send.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Some(Role::Student),
            "teacher" | "faculty" => Some(Role::Teacher),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }
}

/// The logged-in user a request runs as.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
    pub assigned_sections: Vec<String>,
}

impl Actor {
    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Teacher | Role::Admin)
    }

    /// Whether this actor may see the records of a student placed in `section`.
    /// A teacher with no assigned sections covers every section.
    pub fn can_access_student(&self, student_id: &str, section: Option<&str>) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Student => self.user_id == student_id,
            Role::Teacher => {
                if self.assigned_sections.is_empty() {
                    return true;
                }
                let Some(section) = section else {
                    return false;
                };
                self.assigned_sections
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(section.trim()))
            }
        }
    }

    /// Whether this actor may create/update/delete records for that student.
    pub fn can_write_student(&self, student_id: &str, section: Option<&str>) -> bool {
        self.is_staff() && self.can_access_student(student_id, section)
    }
}

pub fn new_salt() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn verify_password(salt: &str, password: &str, expected_hash: &str) -> bool {
    hash_password(salt, password) == expected_hash
}

pub fn parse_sections(raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw)
        .unwrap_or_default()
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
