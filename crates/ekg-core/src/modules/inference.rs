//! Inference of missing item correlations
//!
//! Events recorded by material handling resources often name only the
//! resource. The rules here correlate such events with the items the
//! resource carried, based on load and unload events at the same location.

use tracing::info;

use crate::database::DatabaseConnection;
use crate::error::Result;
use crate::performance::PerformanceTracker;
use crate::query::inference::{self as inference_ql, Operation};
use crate::semantic_header::SemanticHeader;

/// Node type of the resources that move items
pub const DEFAULT_RESOURCE_TYPE: &str = "Equipment";

/// Runs the correlation inference rules for node types of a semantic header
pub struct InferenceEngine<'a> {
    connection: &'a DatabaseConnection,
    semantic_header: &'a SemanticHeader,
    resource_type: String,
    tracker: Option<PerformanceTracker>,
}

impl<'a> InferenceEngine<'a> {
    pub fn new(connection: &'a DatabaseConnection, semantic_header: &'a SemanticHeader) -> Self {
        Self {
            connection,
            semantic_header,
            resource_type: DEFAULT_RESOURCE_TYPE.to_string(),
            tracker: None,
        }
    }

    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = resource_type.into();
        self
    }

    pub fn tracker(mut self, tracker: PerformanceTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    fn finished_step(&self, name: impl Into<String>) {
        if let Some(tracker) = &self.tracker {
            tracker.finished_step(name);
        }
    }

    /// Connect items of `entity_type` to the positions of `position_type` their events share
    pub async fn match_entity_with_batch_position(&self, entity_type: &str, position_type: &str) -> Result<()> {
        let entity = self.semantic_header.entity(entity_type)?;
        let position = self.semantic_header.entity(position_type)?;
        self.connection
            .exec_query(inference_ql::match_entity_with_batch_position(entity, position))
            .await?;
        self.finished_step(format!("match {} with {}", entity_type, position_type));
        Ok(())
    }

    /// Correlate events with the item last loaded at the same location
    pub async fn infer_items_propagate_downwards_one_level(&self, entity_type: &str) -> Result<()> {
        let entity = self.semantic_header.entity(entity_type)?;
        let resource = self.semantic_header.entity(&self.resource_type)?;
        self.connection
            .exec_query(inference_ql::propagate_downwards_one_level(entity, resource))
            .await?;
        self.finished_step(format!("infer {} downwards one level", entity_type));
        Ok(())
    }

    /// Correlate the nearest load or unload event at an enclosing location with each item
    pub async fn infer_items_propagate_upwards_multiple_levels(
        &self,
        entity_type: &str,
        operation: Operation,
    ) -> Result<()> {
        let entity = self.semantic_header.entity(entity_type)?;
        let resource = self.semantic_header.entity(&self.resource_type)?;
        self.connection
            .exec_query(inference_ql::propagate_upwards_multiple_levels(entity, resource, operation))
            .await?;
        self.finished_step(format!("infer {} upwards ({:?})", entity_type, operation));
        Ok(())
    }

    /// Correlate events with items loaded at an enclosing location and kept at the event's position
    pub async fn infer_items_propagate_downwards_multiple_levels_with_batching(
        &self,
        entity_type: &str,
        position_type: &str,
    ) -> Result<()> {
        let entity = self.semantic_header.entity(entity_type)?;
        let position = self.semantic_header.entity(position_type)?;
        let resource = self.semantic_header.entity(&self.resource_type)?;
        self.connection
            .exec_query(inference_ql::propagate_downwards_with_batching(entity, position, resource))
            .await?;
        self.finished_step(format!("infer {} downwards with batching", entity_type));
        Ok(())
    }

    /// All rules in order: batch positions, downwards, upwards to loads and
    /// unloads, then downwards with batching
    pub async fn infer_items(&self, entity_type: &str, position_type: &str) -> Result<()> {
        self.match_entity_with_batch_position(entity_type, position_type).await?;
        self.infer_items_propagate_downwards_one_level(entity_type).await?;
        self.infer_items_propagate_upwards_multiple_levels(entity_type, Operation::Load)
            .await?;
        self.infer_items_propagate_upwards_multiple_levels(entity_type, Operation::Unload)
            .await?;
        self.infer_items_propagate_downwards_multiple_levels_with_batching(entity_type, position_type)
            .await?;
        info!(entity = %entity_type, "Inferred item correlations");
        Ok(())
    }
}
