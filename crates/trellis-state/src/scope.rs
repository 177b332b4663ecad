use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StateError;

pub type ScopeId = u64;

/// The workflow-instance scope. Every other scope descends from it.
pub const INSTANCE_SCOPE: ScopeId = 0;

/// One level of the scope chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
  pub id: ScopeId,
  pub parent: Option<ScopeId>,
  /// A name present here is declared by this scope, even when its value is null.
  #[serde(default)]
  pub variables: BTreeMap<String, Value>,
}

/// Arena of scopes linked by parent id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableStore {
  scopes: BTreeMap<ScopeId, Scope>,
  next_id: ScopeId,
}

impl VariableStore {
  pub fn new() -> Self {
    let mut scopes = BTreeMap::new();
    scopes.insert(
      INSTANCE_SCOPE,
      Scope {
        id: INSTANCE_SCOPE,
        parent: None,
        variables: BTreeMap::new(),
      },
    );
    Self { scopes, next_id: 1 }
  }

  pub fn get(&self, scope: ScopeId) -> Option<&Scope> {
    self.scopes.get(&scope)
  }

  pub fn contains(&self, scope: ScopeId) -> bool {
    self.scopes.contains_key(&scope)
  }

  pub fn len(&self) -> usize {
    self.scopes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.scopes.is_empty()
  }

  pub fn create_scope(&mut self, parent: ScopeId) -> Result<ScopeId, StateError> {
    if !self.contains(parent) {
      return Err(StateError::ScopeNotFound(parent));
    }
    let id = self.next_id;
    self.next_id += 1;
    self.scopes.insert(
      id,
      Scope {
        id,
        parent: Some(parent),
        variables: BTreeMap::new(),
      },
    );
    Ok(id)
  }

  /// Declare `name` in `scope`, initialized to null unless already present.
  pub fn declare(&mut self, scope: ScopeId, name: &str) -> Result<(), StateError> {
    let scope = self
      .scopes
      .get_mut(&scope)
      .ok_or(StateError::ScopeNotFound(scope))?;
    scope
      .variables
      .entry(name.to_string())
      .or_insert(Value::Null);
    Ok(())
  }

  /// Look `name` up from `scope` outward. `None` means no scope in the chain defines it.
  pub fn read(&self, scope: ScopeId, name: &str) -> Option<&Value> {
    let mut current = self.scopes.get(&scope);
    while let Some(s) = current {
      if let Some(value) = s.variables.get(name) {
        return Some(value);
      }
      current = s.parent.and_then(|p| self.scopes.get(&p));
    }
    None
  }

  /// Write into the nearest scope declaring `name`, or into `scope` itself.
  ///
  /// Returns the scope that received the value.
  pub fn write(&mut self, scope: ScopeId, name: &str, value: Value) -> Result<ScopeId, StateError> {
    let chain = self.chain(scope)?;
    let target = chain
      .iter()
      .copied()
      .find(|id| {
        self
          .scopes
          .get(id)
          .is_some_and(|s| s.variables.contains_key(name))
      })
      .unwrap_or(scope);

    let entry = self
      .scopes
      .get_mut(&target)
      .ok_or(StateError::ScopeNotFound(target))?;
    entry.variables.insert(name.to_string(), value);
    Ok(target)
  }

  /// Merge the chain into one namespace, closer scopes shadowing farther ones.
  pub fn flatten(&self, scope: ScopeId) -> Map<String, Value> {
    let mut namespace = Map::new();
    let Ok(chain) = self.chain(scope) else {
      return namespace;
    };
    for id in chain.iter().rev() {
      if let Some(s) = self.scopes.get(id) {
        for (name, value) in &s.variables {
          namespace.insert(name.clone(), value.clone());
        }
      }
    }
    namespace
  }

  /// Scope ids from `scope` up to the instance scope.
  pub fn chain(&self, scope: ScopeId) -> Result<Vec<ScopeId>, StateError> {
    let mut chain = Vec::new();
    let mut current = Some(scope);
    while let Some(id) = current {
      let s = self.scopes.get(&id).ok_or(StateError::ScopeNotFound(id))?;
      chain.push(id);
      current = s.parent;
    }
    Ok(chain)
  }

  /// Remove `scope` and every scope descending from it.
  pub fn remove_scope(&mut self, scope: ScopeId) -> Result<(), StateError> {
    if scope == INSTANCE_SCOPE {
      return Err(StateError::InstanceScope);
    }
    if !self.contains(scope) {
      return Err(StateError::ScopeNotFound(scope));
    }

    let mut doomed = vec![scope];
    let mut i = 0;
    while i < doomed.len() {
      let parent = doomed[i];
      doomed.extend(
        self
          .scopes
          .values()
          .filter(|s| s.parent == Some(parent))
          .map(|s| s.id),
      );
      i += 1;
    }
    for id in doomed {
      self.scopes.remove(&id);
    }
    Ok(())
  }
}

impl Default for VariableStore {
  fn default() -> Self {
    Self::new()
  }
}
