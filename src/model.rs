//! Model collaborator seam
//!
//! The pipeline does not fit models. Any classifier that can be trained on a
//! design matrix and return probabilities plugs in through these traits and
//! is then scored by the threshold sweep.

use crate::error::PanelError;

/// A fitted scorer producing positive-class probabilities in [0, 1]
pub trait ProbabilityModel: Send + Sync {
    /// One probability per input row
    fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, PanelError>;
}

/// Trains a [`ProbabilityModel`] from a design matrix and binary labels
pub trait ModelFitter {
    fn fit(&self, x: &[Vec<f64>], y: &[u8]) -> Result<Box<dyn ProbabilityModel>, PanelError>;
}

/// Check the collaborator honoured the row-count contract
pub(crate) fn checked_predict(
    model: &dyn ProbabilityModel,
    x: &[Vec<f64>],
) -> Result<Vec<f64>, PanelError> {
    let scores = model.predict_proba(x)?;
    if scores.len() != x.len() {
        return Err(PanelError::ModelError(format!(
            "model returned {} scores for {} rows",
            scores.len(),
            x.len()
        )));
    }
    Ok(scores)
}
