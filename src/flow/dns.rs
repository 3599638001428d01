//! DNS messages carried by DNS flows
//!
//! These are already-parsed records handed over by the protocol engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub class: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub class: String,
    pub ttl: u32,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsMessage {
    pub id: u16,
    pub query: bool,
    pub op_code: String,
    pub authoritative_answer: bool,
    pub truncation: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub response_code: String,
    pub status_code: u16,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additionals: Vec<ResourceRecord>,
    pub size: usize,
    pub timestamp: DateTime<Utc>,
}

impl DnsMessage {
    /// A single-question query
    pub fn query(id: u16, name: &str, record_type: &str) -> Self {
        Self {
            id,
            query: true,
            op_code: "QUERY".to_string(),
            authoritative_answer: false,
            truncation: false,
            recursion_desired: true,
            recursion_available: false,
            response_code: "NOERROR".to_string(),
            status_code: 200,
            questions: vec![Question {
                name: name.to_string(),
                record_type: record_type.to_string(),
                class: "IN".to_string(),
            }],
            answers: Vec::new(),
            authorities: Vec::new(),
            additionals: Vec::new(),
            size: 0,
            timestamp: Utc::now(),
        }
    }

    /// Build the response to this query with the given answers
    pub fn answer(&self, answers: Vec<ResourceRecord>) -> Self {
        let mut resp = self.clone();
        resp.query = false;
        resp.recursion_available = true;
        resp.answers = answers;
        resp.timestamp = Utc::now();
        resp
    }
}
