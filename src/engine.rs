use std::fmt::Display;

use crate::datatypes::{CellErrorField, DesignVariable, SizeTable};

#[derive(Debug)]
pub enum EngineError {
    /// A named capability or engine-side object the call needs does not
    /// exist in the loaded simulation. Callers documented as
    /// skip-on-absence degrade; everywhere else this is fatal.
    Absent(String),
    /// Any other engine failure. Always fatal for the current cycle.
    Failed(String),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Absent(what) => write!(f, "absent from engine: {}", what),
            EngineError::Failed(message) => write!(f, "engine failure: {}", message),
        }
    }
}

/// The capability set an external flow engine exposes to the bridge and
/// the adaptation controller. Implementations own all solver state; the
/// callers never see meshes or residuals, only these entry points.
///
/// Solver-state obligations on implementors:
/// * `restart_primal` resets iteration counters and solution histories and
///   re-enables the monitor-convergence stop criterion;
/// * the adjoint entry points disable that stop criterion for their run;
/// * `remesh(Some(..))` with no size-controlled mesher configured skips
///   the size-table assignment and still meshes.
pub trait FlowEngine {
    /// Sets the inflow angle-of-attack boundary parameter, in degrees
    fn set_angle_of_attack(&mut self, degrees: f64) -> Result<(), EngineError>;

    /// Reports the current value of a named functional output
    fn function_value(&mut self, name: &str) -> Result<f64, EngineError>;

    /// Reports d(function)/d(variable) from the adjoint solution. The
    /// engine dispatches on the variable's role: boundary-parameter
    /// sensitivity for angle of attack, gradient-table lookup for
    /// control points.
    fn partial_derivative(
        &mut self,
        function: &str,
        variable: &DesignVariable,
    ) -> Result<f64, EngineError>;

    /// Pushes a batch of control-point displacements into the engine's
    /// geometry tables and morphs the volume mesh once
    fn update_control_points(&mut self, variables: &[DesignVariable]) -> Result<(), EngineError>;

    /// Runs the primal solver for up to `steps` iterations
    fn run_primal(&mut self, steps: u32) -> Result<(), EngineError>;

    /// Clears solution history, re-enables the monitor stop criterion,
    /// and runs the primal solver for up to `steps` iterations
    fn restart_primal(&mut self, steps: u32) -> Result<(), EngineError>;

    /// Runs the adjoint solver single-phase for `steps` iterations
    fn run_adjoint(&mut self, steps: u32) -> Result<(), EngineError>;

    /// Runs the adjoint solver in two phases: `first_order_steps` on the
    /// first-order upwind discretization to seed the solution, then
    /// `second_order_steps` at second order. The engine enables its
    /// accelerated (GMRES) linear solver for this mode only.
    fn run_adjoint_warm_start(
        &mut self,
        first_order_steps: u32,
        second_order_steps: u32,
    ) -> Result<(), EngineError>;

    /// Regenerates the volume mesh, optionally under a spatial size table
    fn remesh(&mut self, size_table: Option<&SizeTable>) -> Result<(), EngineError>;

    /// Creates the engine-side error-indicator artifacts for a functional.
    /// Reports `Absent` when the adjoint cost function does not exist.
    fn prepare_error_indicators(&mut self, functional: &str) -> Result<(), EngineError>;

    /// Exports the per-cell adjoint error estimates for a functional.
    /// Reports `Absent` when the adjoint cost function does not exist.
    fn adjoint_error_field(&mut self, functional: &str) -> Result<CellErrorField, EngineError>;

    /// Removes the indicator artifacts created by
    /// `prepare_error_indicators`. Safe to call when none exist.
    fn clear_adaptation_artifacts(&mut self) -> Result<(), EngineError>;

    /// Snapshots the engine state under a tag after a solve pass
    fn save_state(&mut self, tag: &str) -> Result<(), EngineError>;
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;

    use super::*;
    use crate::datatypes::MeshTopology;

    /// Scripted engine for bridge and controller tests. Records every
    /// call as a formatted string so tests can assert exact sequences.
    pub struct MockEngine {
        pub calls: Vec<String>,
        pub values: HashMap<String, f64>,
        pub partials: HashMap<(String, String), f64>,
        pub error_field: Option<CellErrorField>,
        pub functional_absent: bool,
    }

    impl MockEngine {
        pub fn new() -> MockEngine {
            MockEngine {
                calls: Vec::new(),
                values: HashMap::new(),
                partials: HashMap::new(),
                error_field: None,
                functional_absent: false,
            }
        }
    }

    impl FlowEngine for MockEngine {
        fn set_angle_of_attack(&mut self, degrees: f64) -> Result<(), EngineError> {
            self.calls.push(format!("set_alpha {}", degrees));
            Ok(())
        }

        fn function_value(&mut self, name: &str) -> Result<f64, EngineError> {
            self.calls.push(format!("value {}", name));
            match self.values.get(name) {
                Some(value) => Ok(*value),
                None => Err(EngineError::Failed(format!(
                    "no scripted value for {}",
                    name
                ))),
            }
        }

        fn partial_derivative(
            &mut self,
            function: &str,
            variable: &DesignVariable,
        ) -> Result<f64, EngineError> {
            self.calls
                .push(format!("partial {} {}", function, variable.name));
            let key = (function.to_string(), variable.name.clone());
            Ok(*self.partials.get(&key).unwrap_or(&0.0))
        }

        fn update_control_points(
            &mut self,
            variables: &[DesignVariable],
        ) -> Result<(), EngineError> {
            let names: Vec<&str> = variables.iter().map(|v| v.name.as_str()).collect();
            self.calls
                .push(format!("update_control_points [{}]", names.join(" ")));
            Ok(())
        }

        fn run_primal(&mut self, steps: u32) -> Result<(), EngineError> {
            self.calls.push(format!("run_primal {}", steps));
            Ok(())
        }

        fn restart_primal(&mut self, steps: u32) -> Result<(), EngineError> {
            self.calls.push(format!("restart_primal {}", steps));
            Ok(())
        }

        fn run_adjoint(&mut self, steps: u32) -> Result<(), EngineError> {
            self.calls.push(format!("run_adjoint {}", steps));
            Ok(())
        }

        fn run_adjoint_warm_start(
            &mut self,
            first_order_steps: u32,
            second_order_steps: u32,
        ) -> Result<(), EngineError> {
            self.calls.push(format!(
                "warm_start {} {}",
                first_order_steps, second_order_steps
            ));
            Ok(())
        }

        fn remesh(&mut self, size_table: Option<&SizeTable>) -> Result<(), EngineError> {
            match size_table {
                Some(table) => self.calls.push(format!("remesh {}", table.entries.len())),
                None => self.calls.push("remesh none".to_string()),
            }
            Ok(())
        }

        fn prepare_error_indicators(&mut self, functional: &str) -> Result<(), EngineError> {
            self.calls.push(format!("prepare {}", functional));
            if self.functional_absent {
                return Err(EngineError::Absent(functional.to_string()));
            }
            Ok(())
        }

        fn adjoint_error_field(&mut self, functional: &str) -> Result<CellErrorField, EngineError> {
            self.calls.push(format!("field {}", functional));
            if self.functional_absent {
                return Err(EngineError::Absent(functional.to_string()));
            }
            match &self.error_field {
                Some(field) => Ok(field.clone()),
                None => Ok(CellErrorField {
                    topology: MeshTopology::TwoDimensional,
                    cells: Vec::new(),
                }),
            }
        }

        fn clear_adaptation_artifacts(&mut self) -> Result<(), EngineError> {
            self.calls.push("clear".to_string());
            Ok(())
        }

        fn save_state(&mut self, tag: &str) -> Result<(), EngineError> {
            self.calls.push(format!("save {}", tag));
            Ok(())
        }
    }
}
