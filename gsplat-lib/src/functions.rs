//! Named per-splat query functions for simulation hosts.
//!
//! A host resolves a name to a [`SplatFunction`] once through the
//! [`FunctionTable`] and then evaluates it per index or per batch.

use crate::structures::SplatStore;
use foldhash::{HashMap, HashMapExt};
use glam::{Quat, Vec3, Vec4};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Int,
    Float,
    Vec3,
    Quat,
    Color,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FunctionValue {
    Int(i32),
    Float(f32),
    Vec3(Vec3),
    Quat(Quat),
    Color(Vec4),
}

impl FunctionValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            FunctionValue::Int(_) => ValueType::Int,
            FunctionValue::Float(_) => ValueType::Float,
            FunctionValue::Vec3(_) => ValueType::Vec3,
            FunctionValue::Quat(_) => ValueType::Quat,
            FunctionValue::Color(_) => ValueType::Color,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSignature {
    pub name: &'static str,
    pub inputs: &'static [(&'static str, ValueType)],
    pub output: (&'static str, ValueType),
}

const INDEX_INPUT: &[(&str, ValueType)] = &[("Index", ValueType::Int)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SplatFunction {
    Count,
    Position,
    Scale,
    Orientation,
    Opacity,
    Color,
}

impl SplatFunction {
    pub const ALL: [SplatFunction; 6] = [
        SplatFunction::Count,
        SplatFunction::Position,
        SplatFunction::Scale,
        SplatFunction::Orientation,
        SplatFunction::Opacity,
        SplatFunction::Color,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SplatFunction::Count => "GetSplatCount",
            SplatFunction::Position => "GetSplatPosition",
            SplatFunction::Scale => "GetSplatScale",
            SplatFunction::Orientation => "GetSplatOrientation",
            SplatFunction::Opacity => "GetSplatOpacity",
            SplatFunction::Color => "GetSplatColor",
        }
    }

    pub fn signature(self) -> FunctionSignature {
        let (inputs, output) = match self {
            SplatFunction::Count => (&[][..], ("Count", ValueType::Int)),
            SplatFunction::Position => (INDEX_INPUT, ("Position", ValueType::Vec3)),
            SplatFunction::Scale => (INDEX_INPUT, ("Scale", ValueType::Vec3)),
            SplatFunction::Orientation => (INDEX_INPUT, ("Orientation", ValueType::Quat)),
            SplatFunction::Opacity => (INDEX_INPUT, ("Opacity", ValueType::Float)),
            SplatFunction::Color => (INDEX_INPUT, ("Color", ValueType::Color)),
        };
        FunctionSignature {
            name: self.name(),
            inputs,
            output,
        }
    }

    /// `Count` ignores `index`. Out-of-range indices yield the query defaults.
    pub fn evaluate(self, store: &SplatStore, tint: Vec4, index: i32) -> FunctionValue {
        match self {
            SplatFunction::Count => FunctionValue::Int(store.count()),
            SplatFunction::Position => FunctionValue::Vec3(store.position(index)),
            SplatFunction::Scale => FunctionValue::Vec3(store.scale(index)),
            SplatFunction::Orientation => FunctionValue::Quat(store.orientation(index)),
            SplatFunction::Opacity => FunctionValue::Float(store.opacity(index)),
            SplatFunction::Color => FunctionValue::Color(store.color(index, tint)),
        }
    }

    pub fn evaluate_batch(
        self,
        store: &SplatStore,
        tint: Vec4,
        indices: &[i32],
        out: &mut Vec<FunctionValue>,
    ) {
        out.clear();
        out.extend(indices.iter().map(|&i| self.evaluate(store, tint, i)));
    }
}

/// Name to function map, built once.
#[derive(Debug, Clone)]
pub struct FunctionTable {
    by_name: HashMap<&'static str, SplatFunction>,
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionTable {
    pub fn new() -> Self {
        let mut by_name = HashMap::with_capacity(SplatFunction::ALL.len());
        for function in SplatFunction::ALL {
            by_name.insert(function.name(), function);
        }
        Self { by_name }
    }

    pub fn resolve(&self, name: &str) -> Option<SplatFunction> {
        self.by_name.get(name).copied()
    }

    pub fn signatures(&self) -> Vec<FunctionSignature> {
        SplatFunction::ALL.iter().map(|f| f.signature()).collect()
    }
}
