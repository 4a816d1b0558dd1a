// src/job/spec.rs

use std::fmt;

use minicbor::{Decode, Encode};

use crate::errors::{CalcNodeError, Result};
use crate::types::{ComputationTargetSpecification, ExecutionLogMode, ValueSpecification};

/// Identifies one dispatched job.
///
/// Created by the coordinator and only ever referenced afterwards; every
/// message concerning the job carries a copy of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct CalculationJobSpecification {
    /// Opaque identifier of the view cycle that produced the job.
    #[n(0)]
    pub view_cycle_id: String,
    /// Calculation configuration the job belongs to.
    #[n(1)]
    pub calc_config: String,
    #[n(2)]
    pub job_id: u64,
}

impl CalculationJobSpecification {
    pub fn new(
        view_cycle_id: impl Into<String>,
        calc_config: impl Into<String>,
        job_id: u64,
    ) -> Self {
        Self {
            view_cycle_id: view_cycle_id.into(),
            calc_config: calc_config.into(),
            job_id,
        }
    }
}

impl fmt::Display for CalculationJobSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.view_cycle_id, self.calc_config, self.job_id)
    }
}

/// One function invocation against one target.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct CalculationJobItem {
    #[n(0)]
    pub function_id: String,
    #[n(1)]
    pub target: ComputationTargetSpecification,
    #[n(2)]
    pub inputs: Vec<ValueSpecification>,
    #[n(3)]
    pub outputs: Vec<ValueSpecification>,
    /// Minimum execution-log detail the coordinator wants for this item.
    #[n(4)]
    pub log_mode: ExecutionLogMode,
}

impl CalculationJobItem {
    pub fn new(
        function_id: impl Into<String>,
        target: ComputationTargetSpecification,
        inputs: Vec<ValueSpecification>,
        outputs: Vec<ValueSpecification>,
    ) -> Self {
        Self {
            function_id: function_id.into(),
            target,
            inputs,
            outputs,
            log_mode: ExecutionLogMode::Indicators,
        }
    }

    pub fn with_log_mode(mut self, log_mode: ExecutionLogMode) -> Self {
        self.log_mode = log_mode;
        self
    }
}

impl fmt::Display for CalculationJobItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.function_id, self.target)
    }
}

/// A batch of job items dispatched together.
///
/// `items` is never empty: [`CalculationJob::new`] and the wire decoder both
/// reject an empty batch.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct CalculationJob {
    #[n(0)]
    specification: CalculationJobSpecification,
    /// Identifier of the function repository state the items were resolved
    /// against; must match the node's last `Init`.
    #[n(1)]
    function_init_id: u64,
    #[n(2)]
    items: Vec<CalculationJobItem>,
}

impl CalculationJob {
    pub fn new(
        specification: CalculationJobSpecification,
        function_init_id: u64,
        items: Vec<CalculationJobItem>,
    ) -> Result<Self> {
        let job = Self {
            specification,
            function_init_id,
            items,
        };
        job.validate()?;
        Ok(job)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.items.is_empty() {
            return Err(CalcNodeError::InvalidJob(format!(
                "job {} has no items",
                self.specification
            )));
        }
        Ok(())
    }

    pub fn specification(&self) -> &CalculationJobSpecification {
        &self.specification
    }

    pub fn function_init_id(&self) -> u64 {
        self.function_init_id
    }

    pub fn items(&self) -> &[CalculationJobItem] {
        &self.items
    }

    /// Mutable access for coordinator-side decoration (e.g. log modes).
    /// The number of items cannot change.
    pub fn items_mut(&mut self) -> &mut [CalculationJobItem] {
        &mut self.items
    }
}
