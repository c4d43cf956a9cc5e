//! ConsumerRegistry - consumer type tag → factory.
//!
//! Registrations (and persisted rows) name a consumer by its `ConsumerType`
//! tag; this table is the only way a tag becomes a live consumer.
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - Arc による共有所有権

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::ConsumerType;
use crate::ports::{ConsumerFactory, TaskConsumer};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Consumer for type '{0}' is already registered")]
    AlreadyRegistered(ConsumerType),
}

#[derive(Default)]
pub struct ConsumerRegistry {
    factories: HashMap<ConsumerType, ConsumerFactory>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        consumer_type: ConsumerType,
        factory: ConsumerFactory,
    ) -> Result<(), RegistryError> {
        if self.factories.contains_key(&consumer_type) {
            return Err(RegistryError::AlreadyRegistered(consumer_type));
        }
        self.factories.insert(consumer_type, factory);
        Ok(())
    }

    pub fn register_fn<F>(&mut self, consumer_type: ConsumerType, f: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Arc<dyn TaskConsumer> + Send + Sync + 'static,
    {
        self.register(consumer_type, Arc::new(f))
    }

    /// A fresh consumer instance, or `None` for an unknown tag.
    pub fn create(&self, consumer_type: &ConsumerType) -> Option<Arc<dyn TaskConsumer>> {
        self.factories.get(consumer_type).map(|factory| factory())
    }

    pub fn contains(&self, consumer_type: &ConsumerType) -> bool {
        self.factories.contains_key(consumer_type)
    }

    pub fn registered_types(&self) -> Vec<ConsumerType> {
        self.factories.keys().cloned().collect()
    }
}
