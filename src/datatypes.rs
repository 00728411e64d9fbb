use std::sync::atomic::{AtomicUsize, Ordering};

use nalgebra::{DMatrix, DVector};

static NEXT_VARIABLE_ID: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryParameter {
    AngleOfAttack,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VariableRole {
    ControlPoint {
        table: String,
        row: usize,
        col: usize,
    },
    BoundaryParameter(BoundaryParameter),
}

/// A single design variable from the independent-variable exchange file.
/// Ids come from a process-wide counter and keep increasing across list
/// rebuilds; `current` is the only field that changes after construction.
#[derive(Debug, Clone)]
pub struct DesignVariable {
    pub id: usize,
    pub name: String,
    pub role: VariableRole,
    pub current: f64,
    pub initial: f64,
    pub min: f64,
    pub max: f64,
    pub typical: f64,
}

impl DesignVariable {
    pub fn new(
        name: String,
        role: VariableRole,
        current: f64,
        initial: f64,
        min: f64,
        max: f64,
        typical: f64,
    ) -> DesignVariable {
        DesignVariable {
            id: NEXT_VARIABLE_ID.fetch_add(1, Ordering::Relaxed),
            name,
            role,
            current,
            initial,
            min,
            max,
            typical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Objective,
    Inequality,
    Equality,
}

impl FunctionKind {
    pub fn from_label(label: &str) -> Option<FunctionKind> {
        match label {
            "Objective" => Some(FunctionKind::Objective),
            "Inequality" => Some(FunctionKind::Inequality),
            "Equality" => Some(FunctionKind::Equality),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FunctionKind::Objective => "Objective",
            FunctionKind::Inequality => "Inequality",
            FunctionKind::Equality => "Equality",
        }
    }
}

/// Functions of one kind, in dependent-variable file order. The gradient
/// matrix, when present, has one row per function and one column per
/// design variable in the bridge's current list order.
#[derive(Debug)]
pub struct FunctionSet {
    pub names: Vec<String>,
    pub values: DVector<f64>,
    pub gradients: Option<DMatrix<f64>>,
}

impl FunctionSet {
    pub fn new() -> FunctionSet {
        FunctionSet {
            names: Vec::new(),
            values: DVector::zeros(0),
            gradients: None,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for FunctionSet {
    fn default() -> FunctionSet {
        FunctionSet::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshTopology {
    TwoDimensional,
    Polyhedral,
    Tetrahedral,
}

impl MeshTopology {
    pub fn from_label(label: &str) -> Option<MeshTopology> {
        match label {
            "two-dimensional" => Some(MeshTopology::TwoDimensional),
            "polyhedral" => Some(MeshTopology::Polyhedral),
            "tetrahedral" => Some(MeshTopology::Tetrahedral),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CellSample {
    pub centroid: [f64; 3],
    pub volume: f64,
    pub error_estimate: f64,
    pub prism: bool,
}

/// Per-cell adjoint error estimates exported by the engine after an
/// adjoint solve, tagged with the mesh topology the sizes derive from.
#[derive(Debug, Clone)]
pub struct CellErrorField {
    pub topology: MeshTopology,
    pub cells: Vec<CellSample>,
}

#[derive(Debug, Clone)]
pub struct SizeEntry {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub size: f64,
}

/// Spatial mesh-size table handed to the engine's remesh capability.
#[derive(Debug, Clone)]
pub struct SizeTable {
    pub entries: Vec<SizeEntry>,
}
