use std::collections::BTreeMap;
use std::sync::Arc;

use super::{BuildStep, StepError, StepKind};

pub type StepFactory = Arc<dyn Fn() -> Box<dyn BuildStep> + Send + Sync>;

/// Step name to factory, resolved when a build runs.
#[derive(Clone, Default)]
pub struct StepRegistry {
  factories: BTreeMap<String, StepFactory>,
}

impl std::fmt::Debug for StepRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_list().entries(self.factories.keys()).finish()
  }
}

impl StepRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry holding every [`StepKind`].
  pub fn standard() -> Self {
    let mut registry = Self::new();
    for kind in StepKind::ALL {
      registry.register(kind.name(), move || kind.create());
    }
    registry
  }

  /// Add or replace the factory for `name`.
  pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
  where
    F: Fn() -> Box<dyn BuildStep> + Send + Sync + 'static,
  {
    self.factories.insert(name.into(), Arc::new(factory));
    self
  }

  pub fn contains(&self, name: &str) -> bool {
    self.factories.contains_key(name)
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.factories.keys().map(String::as_str)
  }

  pub fn create(&self, name: &str) -> Result<Box<dyn BuildStep>, StepError> {
    self
      .factories
      .get(name)
      .map(|factory| factory())
      .ok_or_else(|| StepError::UnknownStep(name.to_string()))
  }

  /// Fail on the first name with no factory.
  pub fn validate<S: AsRef<str>>(&self, names: &[S]) -> Result<(), StepError> {
    match names.iter().find(|name| !self.contains(name.as_ref())) {
      Some(name) => Err(StepError::UnknownStep(name.as_ref().to_string())),
      None => Ok(()),
    }
  }
}
