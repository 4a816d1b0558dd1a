#![allow(dead_code)]

use std::time::Duration;

use calcnode::config::{CoordinatorSettings, NodeSettings, WorkerConfig};
use calcnode::dag::DependencyNode;
use calcnode::exec::backend::{CONSTANT_FUNCTION, NOOP_FUNCTION, SLEEP_FUNCTION};
use calcnode::job::{
    CalculationJob, CalculationJobItem, CalculationJobResult, CalculationJobSpecification,
};
use calcnode::protocol::{
    Cancel, Execute, Failure, FunctionInvocationStatistics, Init, Invocations, IsAlive,
    JobResult, MessageType, NodeMessage, Ready, Scaling,
};
use calcnode::types::{ComputationTargetSpecification, ExecutionLogMode, ValueSpecification};

pub const DEFAULT_CALC_CONFIG: &str = "Default";
pub const DEFAULT_TARGET: &str = "T";

pub fn target(id: &str) -> ComputationTargetSpecification {
    ComputationTargetSpecification::primitive(id)
}

/// `name` on the default target.
pub fn value(name: &str) -> ValueSpecification {
    ValueSpecification::new(name, target(DEFAULT_TARGET))
}

pub fn job_spec(job_id: u64) -> CalculationJobSpecification {
    CalculationJobSpecification::new("cycle-1", DEFAULT_CALC_CONFIG, job_id)
}

/// Graph node producing `outputs` from `inputs`, all on the default target.
pub fn graph_node(function_id: &str, inputs: &[&str], outputs: &[&str]) -> DependencyNode {
    DependencyNode::new(
        function_id,
        target(DEFAULT_TARGET),
        inputs.iter().map(|n| value(n)).collect(),
        outputs.iter().map(|n| value(n)).collect(),
    )
}

/// Builder for `CalculationJob`.
pub struct JobBuilder {
    spec: CalculationJobSpecification,
    function_init_id: u64,
    items: Vec<CalculationJobItem>,
}

impl JobBuilder {
    pub fn new(job_id: u64) -> Self {
        Self {
            spec: job_spec(job_id),
            function_init_id: 1,
            items: Vec::new(),
        }
    }

    pub fn function_init_id(mut self, id: u64) -> Self {
        self.function_init_id = id;
        self
    }

    pub fn item(mut self, item: CalculationJobItem) -> Self {
        self.items.push(item);
        self
    }

    /// `constant` item emitting `value` as output `name`.
    pub fn constant(self, name: &str, constant: f64) -> Self {
        self.item(constant_item(name, constant, &[]))
    }

    /// `sleep` item blocking for `millis`, emitting output `name`.
    pub fn sleep(self, name: &str, millis: u64) -> Self {
        self.item(sleep_item(name, millis))
    }

    pub fn noop(self) -> Self {
        self.item(CalculationJobItem::new(
            NOOP_FUNCTION,
            target(DEFAULT_TARGET),
            Vec::new(),
            vec![value("noop")],
        ))
    }

    pub fn spec(&self) -> CalculationJobSpecification {
        self.spec.clone()
    }

    pub fn build(self) -> CalculationJob {
        CalculationJob::new(self.spec, self.function_init_id, self.items)
            .expect("Failed to build valid job from builder")
    }
}

pub fn constant_item(name: &str, constant: f64, inputs: &[&str]) -> CalculationJobItem {
    CalculationJobItem::new(
        CONSTANT_FUNCTION,
        target(DEFAULT_TARGET),
        inputs.iter().map(|n| value(n)).collect(),
        vec![value(name).with_property("constant", constant.to_string())],
    )
}

pub fn sleep_item(name: &str, millis: u64) -> CalculationJobItem {
    CalculationJobItem::new(
        SLEEP_FUNCTION,
        target(DEFAULT_TARGET),
        Vec::new(),
        vec![value(name).with_property("duration_ms", millis.to_string())],
    )
}

pub fn full_log_item(item: CalculationJobItem) -> CalculationJobItem {
    item.with_log_mode(ExecutionLogMode::Full)
}

/// Builder for a validated `WorkerConfig` with test-friendly timings.
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: WorkerConfig {
                node: NodeSettings {
                    id: "test-node".to_string(),
                    capacity: 1,
                    max_job_item_execution: Duration::from_secs(5),
                    watchdog_check_interval: Duration::from_millis(10),
                    timeout_grace_period: Duration::ZERO,
                    statistics_interval: Duration::from_secs(3600),
                },
                coordinator: CoordinatorSettings {
                    host: "127.0.0.1".to_string(),
                    port: 1,
                    max_frame_bytes: 1024 * 1024,
                },
            },
        }
    }

    pub fn node_id(mut self, id: &str) -> Self {
        self.config.node.id = id.to_string();
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.node.capacity = capacity;
        self
    }

    pub fn max_job_item_execution(mut self, d: Duration) -> Self {
        self.config.node.max_job_item_execution = d;
        self
    }

    pub fn statistics_interval(mut self, d: Duration) -> Self {
        self.config.node.statistics_interval = d;
        self
    }

    pub fn coordinator(mut self, host: &str, port: u16) -> Self {
        self.config.coordinator.host = host.to_string();
        self.config.coordinator.port = port;
        self
    }

    pub fn build(self) -> WorkerConfig {
        self.config
    }
}

impl Default for WorkerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One representative message of each type.
pub fn sample_message(message_type: MessageType) -> NodeMessage {
    match message_type {
        MessageType::Ready => NodeMessage::Ready(Ready {
            capacity: 4,
            node_id: "node-a".to_string(),
        }),
        MessageType::Init => NodeMessage::Init(Init {
            function_init_id: 7,
        }),
        MessageType::Execute => NodeMessage::Execute(Execute {
            job: JobBuilder::new(1).constant("A", 1.5).build(),
        }),
        MessageType::Cancel => NodeMessage::Cancel(
            Cancel::new(vec![job_spec(1), job_spec(2)]).expect("non-empty cancel"),
        ),
        MessageType::IsAlive => NodeMessage::IsAlive(IsAlive {
            jobs: vec![job_spec(3)],
        }),
        MessageType::Scaling => NodeMessage::Scaling(Scaling { capacity: 2 }),
        MessageType::Invocations => NodeMessage::Invocations(Invocations {
            statistics: vec![FunctionInvocationStatistics {
                function_id: CONSTANT_FUNCTION.to_string(),
                invocations: 3,
                mean_nanos: 1200.0,
                mean_inputs: 0.0,
                mean_outputs: 1.0,
            }],
        }),
        MessageType::Result => NodeMessage::Result(JobResult {
            result: CalculationJobResult {
                specification: job_spec(1),
                node_id: "node-a".to_string(),
                duration_nanos: 42,
                items: Vec::new(),
            },
        }),
        MessageType::Failure => NodeMessage::Failure(Failure {
            job: job_spec(4),
            error: "boom".to_string(),
            node_id: "node-a".to_string(),
        }),
    }
}
