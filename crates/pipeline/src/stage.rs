//! Stages: the unit of work in a pipeline.
//!
//! A stage is an id, a display name and a procedure. The engine runs
//! procedures in order; a procedure may append messages, insert further
//! stages right after itself, move the cursor or stop the run.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use weft_core::Result;

use crate::engine::Pipeline;

/// Something a stage does when the cursor reaches it.
#[async_trait]
pub trait StageProcedure: Send + Sync {
    async fn run(&self, pipeline: &mut Pipeline) -> Result<()>;

    /// Rebuild this procedure for a pipeline whose stage ids were regenerated.
    ///
    /// `ids` maps old stage ids to new ones. Procedures that hold no stage
    /// ids return `None` and are shared as-is.
    fn relink(&self, _ids: &HashMap<String, String>) -> Option<Arc<dyn StageProcedure>> {
        None
    }
}

/// A scheduled unit of work.
#[derive(Clone)]
pub struct Stage {
    /// Unique stage id
    pub id: String,

    /// Display name, used for events and tool-loop detection
    pub name: String,

    pub procedure: Arc<dyn StageProcedure>,
}

impl Stage {
    pub fn new(name: impl Into<String>, procedure: impl StageProcedure + 'static) -> Self {
        Self::from_arc(name, Arc::new(procedure))
    }

    pub fn from_arc(name: impl Into<String>, procedure: Arc<dyn StageProcedure>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            procedure,
        }
    }

    /// Same name and procedure under a fresh id.
    pub fn replicate(&self) -> Self {
        Self::from_arc(self.name.clone(), self.procedure.clone())
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// Replicate a run of stages under fresh ids.
///
/// References between stages inside the run (move targets) are rewritten
/// to point at the copies; references outside the run are left alone.
/// Returns the copies and the old-to-new id map.
pub fn replicate_all(stages: &[Stage]) -> (Vec<Stage>, HashMap<String, String>) {
    let copies: Vec<Stage> = stages.iter().map(Stage::replicate).collect();
    let ids: HashMap<String, String> = stages
        .iter()
        .zip(&copies)
        .map(|(old, new)| (old.id.clone(), new.id.clone()))
        .collect();

    let relinked = copies
        .into_iter()
        .map(|stage| match stage.procedure.relink(&ids) {
            Some(procedure) => Stage { procedure, ..stage },
            None => stage,
        })
        .collect();

    (relinked, ids)
}

/// A procedure backed by a caller-supplied async closure.
///
/// ```ignore
/// pipeline.call("log", |p| Box::pin(async move {
///     tracing::info!(messages = p.messages().len(), "checkpoint");
///     Ok(())
/// }));
/// ```
pub struct FnStage<F>(pub F);

#[async_trait]
impl<F> StageProcedure for FnStage<F>
where
    F: for<'a> Fn(&'a mut Pipeline) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    async fn run(&self, pipeline: &mut Pipeline) -> Result<()> {
        (self.0)(pipeline).await
    }
}
