//! Survey response store
//!
//! In-memory, composite-keyed store of survey answers, independent of the
//! SQL engine. Answers are grouped per `(job_number, umr)` and keyed inside
//! a group by `(question_id, survey_type)`. Partial writes merge: only the
//! touched field is overwritten. Every mutation checkpoints the whole store
//! to the key-value store, and startup reloads from that checkpoint.
//!
//! Access is single-threaded cooperative (UI-driven); the interior mutex
//! only makes the type shareable across the async surface.

use crate::kv::{FileKvStore, StoreError};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Checkpoint key in the key-value store
pub const RESPONSES_KEY: &str = "survey_responses";

/// Inspection outcome for one question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurveyResult {
    Passed,
    #[serde(rename = "Non-Compliant")]
    NonCompliant,
    #[serde(rename = "Unable-to-Validate")]
    UnableToValidate,
    #[serde(rename = "N-A")]
    NotApplicable,
}

/// A captured photo reference attached to an answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerImage {
    pub uri: String,
    pub file_name: String,
}

/// One survey answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: i64,
    pub survey_type: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SurveyResult>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub images: Vec<AnswerImage>,
    /// Capture metadata, set at first write for the key
    pub time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geostamp: Option<String>,
    pub question_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nc_severity: Option<String>,
}

/// All answers for one unit of one job, the persisted grouping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerGroup {
    pub job_number: String,
    pub umr: String,
    pub survey_question_set_id: i64,
    pub survey_type: i64,
    pub test_result: Vec<AnswerRecord>,
}

/// Identifies which survey a write belongs to
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_number: String,
    pub survey_question_set_id: i64,
    pub survey_type: i64,
}

/// The single field a partial write touches
#[derive(Debug, Clone)]
pub enum AnswerField {
    Result(Option<SurveyResult>),
    Comment(String),
    Images(Vec<AnswerImage>),
}

pub struct ResponseStore {
    kv: Arc<FileKvStore>,
    groups: Mutex<Vec<AnswerGroup>>,
}

impl ResponseStore {
    /// Load the store from its checkpoint; an absent checkpoint is an
    /// empty store.
    pub fn load(kv: Arc<FileKvStore>) -> Result<Self, StoreError> {
        let groups = match kv.get(RESPONSES_KEY) {
            Some(text) => serde_json::from_str(&text)?,
            None => Vec::new(),
        };

        Ok(Self {
            kv,
            groups: Mutex::new(groups),
        })
    }

    /// Merge one field into the answer for
    /// `(job_number, umr, question_id, survey_type)`, creating the group
    /// and the record on first write. Only the named field changes.
    #[allow(clippy::too_many_arguments)]
    pub fn set_value(
        &self,
        ctx: &JobContext,
        umr: &str,
        question_number: &str,
        nc_severity: Option<&str>,
        geostamp: Option<&str>,
        question_id: i64,
        field: AnswerField,
    ) -> Result<(), StoreError> {
        let mut groups = self.groups.lock();

        let group_idx = match groups
            .iter()
            .position(|g| g.job_number == ctx.job_number && g.umr == umr)
        {
            Some(i) => i,
            None => {
                groups.push(AnswerGroup {
                    job_number: ctx.job_number.clone(),
                    umr: umr.to_string(),
                    survey_question_set_id: ctx.survey_question_set_id,
                    survey_type: ctx.survey_type,
                    test_result: Vec::new(),
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[group_idx];

        let record = match group
            .test_result
            .iter_mut()
            .position(|r| r.question_id == question_id && r.survey_type == ctx.survey_type)
        {
            Some(i) => &mut group.test_result[i],
            None => {
                group.test_result.push(AnswerRecord {
                    question_id,
                    survey_type: ctx.survey_type,
                    result: None,
                    comment: String::new(),
                    images: Vec::new(),
                    time: Utc::now().to_rfc3339(),
                    geostamp: geostamp.map(str::to_string),
                    question_number: question_number.to_string(),
                    nc_severity: nc_severity.map(str::to_string),
                });
                let last = group.test_result.len() - 1;
                &mut group.test_result[last]
            }
        };

        match field {
            AnswerField::Result(result) => record.result = result,
            AnswerField::Comment(comment) => record.comment = comment,
            AnswerField::Images(images) => record.images = images,
        }

        self.checkpoint(&groups)
    }

    /// Append one image to an answer, preserving capture order
    #[allow(clippy::too_many_arguments)]
    pub fn push_image(
        &self,
        ctx: &JobContext,
        umr: &str,
        question_number: &str,
        nc_severity: Option<&str>,
        geostamp: Option<&str>,
        question_id: i64,
        image: AnswerImage,
    ) -> Result<(), StoreError> {
        let existing = self
            .answer_for(&ctx.job_number, umr, question_id, ctx.survey_type)
            .map(|r| r.images)
            .unwrap_or_default();

        let mut images = existing;
        images.push(image);

        self.set_value(
            ctx,
            umr,
            question_number,
            nc_severity,
            geostamp,
            question_id,
            AnswerField::Images(images),
        )
    }

    /// Purge the whole group for one job/unit
    pub fn remove_job_survey_data(&self, job_number: &str, umr: &str) -> Result<(), StoreError> {
        let mut groups = self.groups.lock();
        groups.retain(|g| !(g.job_number == job_number && g.umr == umr));
        self.checkpoint(&groups)
    }

    /// Snapshot of the group for one job/unit
    pub fn answers_for(&self, job_number: &str, umr: &str) -> Option<AnswerGroup> {
        self.groups
            .lock()
            .iter()
            .find(|g| g.job_number == job_number && g.umr == umr)
            .cloned()
    }

    /// Snapshot of one answer record
    pub fn answer_for(
        &self,
        job_number: &str,
        umr: &str,
        question_id: i64,
        survey_type: i64,
    ) -> Option<AnswerRecord> {
        self.groups
            .lock()
            .iter()
            .find(|g| g.job_number == job_number && g.umr == umr)?
            .test_result
            .iter()
            .find(|r| r.question_id == question_id && r.survey_type == survey_type)
            .cloned()
    }

    /// Snapshot of every group, flattened the way it persists
    pub fn groups(&self) -> Vec<AnswerGroup> {
        self.groups.lock().clone()
    }

    /// Full-state persist: the whole store serializes on every mutation
    fn checkpoint(&self, groups: &[AnswerGroup]) -> Result<(), StoreError> {
        self.kv.set(RESPONSES_KEY, &serde_json::to_string(groups)?)
    }
}
