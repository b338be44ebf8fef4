use std::error::Error as _;

use serde::Serialize;
use tracing::{error, info};

use crate::error::{EtlError, Result};
use crate::pipeline::{Pipeline, PipelineSummary};
use crate::progress;

#[derive(Debug, Clone, Serialize)]
pub struct QueueSummary {
    pub queued: usize,
    pub pipelines: Vec<PipelineSummary>,
}

impl QueueSummary {
    /// True when every queued pipeline ran to completion.
    pub fn succeeded(&self) -> bool {
        self.pipelines.len() == self.queued
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineFailure {
    pub source: String,
    pub error: String,
}

/// Result of an isolated run: completed pipelines and the ones that failed.
#[derive(Debug, Clone, Serialize)]
pub struct QueueReport {
    pub completed: Vec<PipelineSummary>,
    pub failures: Vec<PipelineFailure>,
}

impl QueueReport {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Ordered pipelines executed strictly one after another.
#[derive(Debug, Clone, Default)]
pub struct PipelineQueue {
    pipelines: Vec<Pipeline>,
}

impl PipelineQueue {
    pub fn new(pipelines: Vec<Pipeline>) -> Self {
        Self { pipelines }
    }

    pub fn push(&mut self, pipeline: Pipeline) {
        self.pipelines.push(pipeline);
    }

    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Fail-fast run. The first failing pipeline's error is returned and the
    /// remaining pipelines are not started.
    pub fn run(&self) -> Result<QueueSummary> {
        let pb = progress::item_bar(self.pipelines.len());
        let mut completed = Vec::with_capacity(self.pipelines.len());

        for pipeline in &self.pipelines {
            pb.set_message(format!("Running {} pipeline", pipeline.source().name()));
            completed.push(pipeline.run()?);
            pb.inc(1);
        }
        pb.finish_and_clear();

        info!(pipelines = completed.len(), "Queue finished");
        Ok(QueueSummary {
            queued: self.pipelines.len(),
            pipelines: completed,
        })
    }

    /// Run every pipeline even when earlier ones fail, collecting failures
    /// instead of propagating them.
    pub fn run_isolated(&self) -> QueueReport {
        let pb = progress::item_bar(self.pipelines.len());
        let mut report = QueueReport {
            completed: Vec::new(),
            failures: Vec::new(),
        };

        for pipeline in &self.pipelines {
            let name = pipeline.source().name();
            pb.set_message(format!("Running {name} pipeline"));
            match pipeline.run() {
                Ok(summary) => report.completed.push(summary),
                Err(err) => {
                    let message = error_chain(&err);
                    error!(source = name, error = %message, "Pipeline failed; continuing");
                    report.failures.push(PipelineFailure {
                        source: name.to_string(),
                        error: message,
                    });
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        info!(
            completed = report.completed.len(),
            failed = report.failures.len(),
            "Queue finished"
        );
        report
    }
}

fn error_chain(err: &EtlError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
