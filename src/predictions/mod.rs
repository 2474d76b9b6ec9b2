//! Prediction acquisition and official tip submission.

pub mod requestor;
pub mod submitter;

pub use requestor::{
    HttpPredictionService, PredictionRequestReport, PredictionRequestor, PredictionService,
    ServicePredictionRow,
};
pub use submitter::{SubmissionReport, TipSubmitter};
