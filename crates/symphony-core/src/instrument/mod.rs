//! Instruments: self-contained loop procedures.
//!
//! An instrument declares the capabilities it needs, receives tools at
//! construction from the [`crate::tools::ToolRegistry`], and exposes a
//! single `execute` that iterates to a termination decision. The set is
//! closed: the four baseline instruments plus dynamically registered
//! phase-based loop specifications, all reached through the
//! name-keyed [`InstrumentCatalog`].

pub mod loop_spec;
pub mod note;
pub mod research;
pub mod synthesis;
pub mod vision;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use symphony_db::models::ProcessType;

use crate::context::TaskContext;
use crate::error::LoopError;
use crate::termination::TerminationConfig;
use crate::tools::ToolRegistry;
use crate::types::InstrumentResult;

pub use loop_spec::LoopSpec;

/// Static declaration of an instrument.
#[derive(Debug, Clone)]
pub struct InstrumentSpec {
    pub name: String,
    pub required_capabilities: Vec<String>,
    pub optional_capabilities: Vec<String>,
    pub max_iterations: u32,
    pub process_type: ProcessType,
}

/// A self-contained loop procedure.
#[async_trait]
pub trait Instrument: Send + Sync {
    fn spec(&self) -> &InstrumentSpec;

    async fn execute(
        &self,
        query: &str,
        ctx: &TaskContext,
    ) -> Result<InstrumentResult, LoopError>;
}

// Compile-time assertion: Instrument must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Instrument) {}
};

/// The closed, name-keyed instrument set.
///
/// Built once at startup. Construction resolves every instrument's
/// required capabilities against the registry; a missing capability is
/// fatal here, before any task runs.
pub struct InstrumentCatalog {
    instruments: HashMap<String, Arc<dyn Instrument>>,
}

impl InstrumentCatalog {
    pub fn build(
        registry: &ToolRegistry,
        termination: TerminationConfig,
        loop_specs: &[LoopSpec],
    ) -> Result<Self, LoopError> {
        let mut instruments: HashMap<String, Arc<dyn Instrument>> = HashMap::new();

        let note = note::NoteInstrument::new(registry)?;
        instruments.insert(note.spec().name.clone(), Arc::new(note));

        let research = research::ResearchInstrument::new(registry, termination)?;
        instruments.insert(research.spec().name.clone(), Arc::new(research));

        let vision = vision::VisionInstrument::new(registry, termination)?;
        instruments.insert(vision.spec().name.clone(), Arc::new(vision));

        let synthesis = synthesis::SynthesisInstrument::new(registry, termination)?;
        instruments.insert(synthesis.spec().name.clone(), Arc::new(synthesis));

        for spec in loop_specs {
            let dynamic = loop_spec::DynamicLoopInstrument::new(registry, spec, termination)?;
            instruments.insert(dynamic.spec().name.clone(), Arc::new(dynamic));
        }

        Ok(Self { instruments })
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Instrument>> {
        self.instruments.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.instruments.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for InstrumentCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentCatalog")
            .field("instruments", &self.names())
            .finish()
    }
}
