//! Usage summary shown on the dashboard.

use std::collections::BTreeMap;

use crate::domain::{Memo, MemoStatus};

/// Aggregates over a set of memos
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageReport {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    /// Memos still moving through the pipeline
    pub processing: usize,
    pub awaiting_review: usize,
    pub audio_minutes: f64,
    /// approved / (approved + rejected); None before any review
    pub approval_rate: Option<f64>,
    pub average_transcript_confidence: Option<f64>,
}

impl UsageReport {
    pub fn from_memos(memos: &[Memo]) -> Self {
        let mut report = UsageReport {
            total: memos.len(),
            ..Default::default()
        };

        let mut approved = 0usize;
        let mut rejected = 0usize;
        let mut confidence_sum = 0.0;
        let mut confidence_count = 0usize;

        for memo in memos {
            *report
                .by_status
                .entry(memo.status.to_string())
                .or_insert(0) += 1;

            if memo.status.is_processing() {
                report.processing += 1;
            }
            match memo.status {
                MemoStatus::PendingReview => report.awaiting_review += 1,
                MemoStatus::Approved => approved += 1,
                MemoStatus::Rejected => rejected += 1,
                _ => {}
            }

            report.audio_minutes += memo.audio_duration_seconds / 60.0;

            if let Some(confidence) = memo.transcript_confidence {
                confidence_sum += confidence;
                confidence_count += 1;
            }
        }

        if approved + rejected > 0 {
            report.approval_rate = Some(approved as f64 / (approved + rejected) as f64);
        }
        if confidence_count > 0 {
            report.average_transcript_confidence = Some(confidence_sum / confidence_count as f64);
        }

        report
    }
}
