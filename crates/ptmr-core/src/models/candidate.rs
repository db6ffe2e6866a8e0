use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Candidate {
    pub id: i64,
    pub user_uid: String,
    pub full_name: String,
    pub email: String,
    pub education: Option<String>,
    pub about_me: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PastExperience {
    pub id: i64,
    pub candidate_id: i64,
    pub industry: String,
    pub job_title: String,
    pub employer: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub present: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Candidate {
    /// Search document for the candidates index. Past experience entries are
    /// maintained separately by the past-experience tasks.
    pub fn to_document(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "user_uid": self.user_uid,
            "full_name": self.full_name,
            "email": self.email,
            "education": self.education,
            "about_me": self.about_me,
            "updated_at": self.updated_at,
        })
    }
}

impl PastExperience {
    /// Years between start and end date; 0 while the position has no end date.
    pub fn length_years(&self) -> f64 {
        match self.end_date {
            Some(end) if end > self.start_date => {
                let days = (end - self.start_date).num_days() as f64;
                (days / 365.25 * 100.0).round() / 100.0
            }
            _ => 0.0,
        }
    }

    /// Entry stored in the candidate document's `past_experience` array.
    pub fn to_document(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id.to_string(),
            "industry": self.industry,
            "job_title": self.job_title,
            "employer": self.employer,
            "start_date": self.start_date,
            "end_date": self.end_date,
            "length": self.length_years(),
            "present": self.present,
            "description": self.description,
        })
    }
}
