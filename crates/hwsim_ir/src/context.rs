//! The type table and structural queries over it.

use crate::arena::Arena;
use crate::error::IrError;
use crate::field::Field;
use crate::function::Function;
use crate::ids::TypeId;
use crate::types::{ComponentType, DataType, StructType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A type registered under a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedType {
    /// The registered name.
    pub name: String,
    /// The type. A [`DataType::Ref`] here is an alias.
    pub datatype: DataType,
}

#[derive(Serialize, Deserialize)]
struct ContextRepr {
    types: Vec<NamedType>,
}

/// The type table a front end populates and the elaborator consumes.
#[derive(Debug, Clone, Default)]
pub struct Context {
    types: Arena<TypeId, NamedType>,
    by_name: HashMap<String, TypeId>,
}

impl Context {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named type under its own name.
    pub fn add_type(&mut self, datatype: DataType) -> Result<TypeId, IrError> {
        let name = datatype
            .name()
            .ok_or_else(|| IrError::UnknownType(format!("{datatype:?}")))?
            .to_string();
        self.add_named(name, datatype)
    }

    /// Registers any type under `name`. Registering a `Ref` creates an alias.
    pub fn add_named(
        &mut self,
        name: impl Into<String>,
        datatype: DataType,
    ) -> Result<TypeId, IrError> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(IrError::DuplicateType(name));
        }
        let id = self.types.alloc(NamedType {
            name: name.clone(),
            datatype,
        });
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` if no type is registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Looks up a type ID by name.
    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    /// The named type for an ID.
    pub fn get(&self, id: TypeId) -> &NamedType {
        self.types.get(id)
    }

    /// The type registered under `name`, aliases unresolved.
    pub fn get_by_name(&self, name: &str) -> Option<&DataType> {
        self.lookup(name).map(|id| &self.types.get(id).datatype)
    }

    /// Iterates over registered types in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &NamedType)> {
        self.types.iter()
    }

    /// Follows `Ref`s until a concrete type is reached.
    pub fn resolve<'a>(&'a self, datatype: &'a DataType) -> Result<&'a DataType, IrError> {
        let mut current = datatype;
        let mut chain: Vec<String> = Vec::new();
        while let DataType::Ref { name } = current {
            if chain.contains(name) {
                chain.push(name.clone());
                return Err(IrError::RefCycle { chain });
            }
            chain.push(name.clone());
            current = self
                .get_by_name(name)
                .ok_or_else(|| IrError::UnresolvedType {
                    name: name.clone(),
                    referenced_by: chain.first().cloned().unwrap_or_default(),
                })?;
        }
        Ok(current)
    }

    /// The component registered under `name`.
    pub fn component(&self, name: &str) -> Result<&ComponentType, IrError> {
        let dt = self
            .get_by_name(name)
            .ok_or_else(|| IrError::UnknownType(name.to_string()))?;
        self.resolve(dt)?
            .as_component()
            .ok_or_else(|| IrError::NotAComponent(name.to_string()))
    }

    /// The resolved super type of a struct body, if it has one.
    pub fn super_of<'a>(&'a self, st: &'a StructType) -> Result<Option<&'a StructType>, IrError> {
        let Some(sup) = &st.super_type else {
            return Ok(None);
        };
        let resolved = self.resolve(sup)?;
        resolved
            .as_struct()
            .map(Some)
            .ok_or_else(|| IrError::NotAComponent(format!("super of {}", st.name)))
    }

    /// The super chain from the root ancestor down to `st` itself.
    fn lineage<'a>(&'a self, st: &'a StructType) -> Result<Vec<&'a StructType>, IrError> {
        let mut chain = vec![st];
        let mut current = st;
        while let Some(sup) = self.super_of(current)? {
            if chain.iter().any(|s| s.name == sup.name) {
                let mut names: Vec<String> = chain.iter().map(|s| s.name.clone()).collect();
                names.push(sup.name.clone());
                return Err(IrError::RefCycle { chain: names });
            }
            chain.push(sup);
            current = sup;
        }
        chain.reverse();
        Ok(chain)
    }

    /// Every field of `st`, inherited fields first.
    ///
    /// The position of a field in the returned list is its structural index.
    pub fn all_fields<'a>(&'a self, st: &'a StructType) -> Result<Vec<&'a Field>, IrError> {
        let mut fields: Vec<&Field> = Vec::new();
        for layer in self.lineage(st)? {
            for f in &layer.fields {
                if fields.iter().any(|e| e.name == f.name) {
                    return Err(IrError::DuplicateField {
                        ty: st.name.clone(),
                        field: f.name.clone(),
                    });
                }
                fields.push(f);
            }
        }
        Ok(fields)
    }

    /// Every function visible on `st`. A subtype's function replaces an
    /// inherited one of the same name in place.
    pub fn functions<'a>(&'a self, st: &'a StructType) -> Result<Vec<&'a Function>, IrError> {
        let mut funcs: Vec<&Function> = Vec::new();
        for layer in self.lineage(st)? {
            for f in &layer.functions {
                match funcs.iter_mut().find(|e| e.name == f.name) {
                    Some(slot) => *slot = f,
                    None => funcs.push(f),
                }
            }
        }
        Ok(funcs)
    }

    /// Checks that every `Ref` resolves and no alias chain loops.
    ///
    /// Collects every problem rather than stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<IrError>> {
        let mut errors = Vec::new();
        for (_, named) in self.types.iter() {
            self.check_type(&named.name, &named.datatype, &mut errors);
            if let Some(st) = named.datatype.as_struct() {
                if let Err(e) = self.all_fields(st) {
                    if !matches!(e, IrError::UnresolvedType { .. }) {
                        errors.push(e);
                    }
                }
            }
        }
        dedup_errors(&mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn check_type(&self, owner: &str, dt: &DataType, errors: &mut Vec<IrError>) {
        if let DataType::Ref { name } = dt {
            match self.resolve(dt) {
                Ok(_) => {}
                Err(IrError::UnresolvedType { .. }) => errors.push(IrError::UnresolvedType {
                    name: name.clone(),
                    referenced_by: owner.to_string(),
                }),
                Err(e) => errors.push(e),
            }
            return;
        }
        if let Some(st) = dt.as_struct() {
            if let Some(sup) = &st.super_type {
                self.check_type(owner, sup, errors);
            }
            for f in &st.fields {
                self.check_type(&format!("{owner}.{}", f.name), &f.datatype, errors);
            }
            return;
        }
        dt.for_each_child(|child| self.check_type(owner, child, errors));
    }

    /// Serializes the type table.
    pub fn to_json(&self) -> Result<String, IrError> {
        let repr = ContextRepr {
            types: self.types.values().cloned().collect(),
        };
        Ok(serde_json::to_string_pretty(&repr)?)
    }

    /// Rebuilds a context from [`Context::to_json`] output.
    pub fn from_json(json: &str) -> Result<Self, IrError> {
        let repr: ContextRepr = serde_json::from_str(json)?;
        let mut ctx = Context::new();
        for named in repr.types {
            ctx.add_named(named.name, named.datatype)?;
        }
        Ok(ctx)
    }
}

fn dedup_errors(errors: &mut Vec<IrError>) {
    let mut seen = std::collections::HashSet::new();
    errors.retain(|e| seen.insert(e.to_string()));
}
