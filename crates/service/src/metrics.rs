//! Service-level counters.
//!
//! Recorded through the `metrics` facade; a recorder is installed by the
//! server binary when metrics are enabled, otherwise recording is a no-op.

use metrics::{counter, describe_counter};

pub const BLUEPRINTS_CREATED: &str = "filter_blueprints_created_total";
pub const BLUEPRINTS_SUBMITTED: &str = "filter_blueprints_submitted_total";
pub const DISPATCH_FAILURES: &str = "filter_output_dispatch_failures_total";
pub const OUTPUTS_COMPLETED: &str = "filter_outputs_completed_total";
pub const PATCH_OPERATIONS: &str = "filter_patch_operations_total";

/// Registers all service metric descriptions.
pub fn register_metrics() {
    describe_counter!(BLUEPRINTS_CREATED, "Total filter blueprints created");
    describe_counter!(BLUEPRINTS_SUBMITTED, "Total filter blueprints submitted");
    describe_counter!(
        DISPATCH_FAILURES,
        "Total submitted outputs that could not be enqueued"
    );
    describe_counter!(OUTPUTS_COMPLETED, "Total filter outputs moved to completed");
    describe_counter!(PATCH_OPERATIONS, "Total dimension patch operations applied");
}

pub(crate) fn record_created() {
    counter!(BLUEPRINTS_CREATED).increment(1);
}

pub(crate) fn record_submitted() {
    counter!(BLUEPRINTS_SUBMITTED).increment(1);
}

pub(crate) fn record_dispatch_failure() {
    counter!(DISPATCH_FAILURES).increment(1);
}

pub(crate) fn record_completed() {
    counter!(OUTPUTS_COMPLETED).increment(1);
}

pub(crate) fn record_patch_operation(op: &'static str) {
    counter!(PATCH_OPERATIONS, "op" => op).increment(1);
}
