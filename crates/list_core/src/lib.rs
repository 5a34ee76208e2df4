//! Selection, staged edits and batch mutations for paged ERP list views.

pub mod config;
pub mod controller;
pub mod events;
pub mod orchestrator;
pub mod overlay;
pub mod resource;
pub mod selection;
pub mod validation;

pub use config::{load_settings, ListViewSettings, DEFAULT_SETTINGS_FILE};
pub use controller::{
    ControllerError, EditMode, ListViewController, OverlaySnapshot, PageSnapshot,
    SelectionPolicy, SelectionSnapshot,
};
pub use events::ListEvent;
pub use orchestrator::{
    AggregateCounts, BatchError, BatchKind, BatchMutationOrchestrator, BatchOperation,
    BatchResult, ErrorKind, KeyFailure,
};
pub use overlay::{CommitPlan, FieldUpdate, InvalidEdit, StagedEdit, StagedEditOverlay};
pub use resource::{HttpResourceApi, MissingResourceApi, ResourceApi, ResourceError};
pub use selection::{SelectionSet, TriState};
pub use validation::{FieldRules, FieldValidator, ParseResult};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
