//! Observation batches.

use crate::values::Observation;
use serde::Serialize;

/// Observations for one observation id, in the order they were added.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IdentifiedObservations {
    /// Observation id the values belong to.
    pub observation_id: i32,
    /// The values, oldest first.
    pub observations: Vec<Observation>,
}

/// An ordered collection of `(observation id, observations)` groups.
///
/// Immutable once built. Use [`ObservationBatch::builder`] to construct one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ObservationBatch {
    groups: Vec<IdentifiedObservations>,
}

impl ObservationBatch {
    /// Start building a batch.
    pub fn builder() -> ObservationBatchBuilder {
        ObservationBatchBuilder::default()
    }

    /// A batch holding a single observation.
    pub fn single(observation_id: i32, observation: Observation) -> Self {
        Self::builder().append(observation_id, observation).build()
    }

    /// The groups in order.
    pub fn groups(&self) -> &[IdentifiedObservations] {
        &self.groups
    }

    /// Total number of observations across all groups.
    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.observations.len()).sum()
    }

    /// True if the batch holds no observations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate `(observation id, observation)` pairs in batch order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, &Observation)> + '_ {
        self.groups.iter().flat_map(|group| {
            group
                .observations
                .iter()
                .map(move |obs| (group.observation_id, obs))
        })
    }
}

/// Builder for [`ObservationBatch`].
///
/// Consecutive appends for the same observation id share one group.
#[derive(Debug, Default)]
pub struct ObservationBatchBuilder {
    groups: Vec<IdentifiedObservations>,
}

impl ObservationBatchBuilder {
    /// Append one observation.
    pub fn append(mut self, observation_id: i32, observation: Observation) -> Self {
        self.push(observation_id, observation);
        self
    }

    /// Append several observations for the same id.
    pub fn append_all(
        mut self,
        observation_id: i32,
        observations: impl IntoIterator<Item = Observation>,
    ) -> Self {
        for observation in observations {
            self.push(observation_id, observation);
        }
        self
    }

    /// Append in place.
    pub fn push(&mut self, observation_id: i32, observation: Observation) {
        match self.groups.last_mut() {
            Some(group) if group.observation_id == observation_id => {
                group.observations.push(observation)
            }
            _ => self.groups.push(IdentifiedObservations {
                observation_id,
                observations: vec![observation],
            }),
        }
    }

    /// Finish the batch.
    pub fn build(self) -> ObservationBatch {
        ObservationBatch {
            groups: self.groups,
        }
    }
}
