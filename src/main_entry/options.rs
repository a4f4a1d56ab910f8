use std::time::Duration;

use derive_builder::Builder;

use crate::executor::EvaluatorConfig;
use crate::parser::Hints;

/// Caller-level settings of a pipeline run. Hint comments in the pipeline text override
/// `parallel` and `batch_size`: stage hints first, then block hints, then these values.
#[derive(Builder, Debug, Clone, PartialEq, Eq)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct PipelineOptions {
    /// Maximum number of evaluation batches in flight for one stage
    #[builder(default = "4")]
    pub parallel: usize,
    /// Maximum number of rows per evaluation batch
    #[builder(default = "32")]
    pub batch_size: usize,
    /// Keep the stage relations of a successful run and hand them to the caller
    #[builder(default = "false")]
    pub retain: bool,
    /// Cancel the run once it has taken this long
    #[builder(default = "None", setter(strip_option))]
    pub timeout: Option<Duration>,
}

impl PipelineOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.parallel == Some(0) {
            return Err("parallel must be at least 1".to_string());
        }
        if self.batch_size == Some(0) {
            return Err("batch_size must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            parallel: 4,
            batch_size: 32,
            retain: false,
            timeout: None,
        }
    }
}

impl PipelineOptions {
    /// Options for a run, with the pipeline block's hints applied.
    pub fn with_hints(&self, hints: &Hints) -> Self {
        Self {
            parallel: hints.parallel.unwrap_or(self.parallel),
            batch_size: hints.batch_size.unwrap_or(self.batch_size),
            ..self.clone()
        }
    }

    /// Evaluation settings of one stage.
    pub fn evaluator_config(&self, stage_hints: &Hints) -> EvaluatorConfig {
        EvaluatorConfig::new(
            stage_hints.parallel.unwrap_or(self.parallel).max(1),
            stage_hints.batch_size.unwrap_or(self.batch_size).max(1),
        )
    }
}

#[cfg(test)]
mod options_test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_builder_defaults_and_validation() {
        let options = PipelineOptionsBuilder::default().build().unwrap();
        assert_eq!(options, PipelineOptions::default());

        let options = PipelineOptionsBuilder::default()
            .parallel(8)
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        assert_eq!((options.parallel, options.batch_size), (8, 32));
        assert_eq!(options.timeout, Some(Duration::from_secs(30)));

        let err = PipelineOptionsBuilder::default()
            .batch_size(0)
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "batch_size must be at least 1");
    }

    #[test]
    fn test_hint_precedence() {
        let caller = PipelineOptionsBuilder::default()
            .parallel(2)
            .batch_size(10)
            .retain(true)
            .build()
            .unwrap();
        let block = Hints {
            parallel: Some(6),
            batch_size: None,
        };
        let run = caller.with_hints(&block);
        assert_eq!((run.parallel, run.batch_size, run.retain), (6, 10, true));

        let stage = Hints {
            parallel: None,
            batch_size: Some(3),
        };
        assert_eq!(run.evaluator_config(&stage), EvaluatorConfig::new(6, 3));
        assert_eq!(
            run.evaluator_config(&Hints::default()),
            EvaluatorConfig::new(6, 10)
        );
    }
}
