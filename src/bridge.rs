use indicatif::ProgressBar;
use nalgebra::{DMatrix, DVector};

use crate::{
    datatypes::{BoundaryParameter, DesignVariable, FunctionKind, FunctionSet, VariableRole},
    engine::FlowEngine,
    error::CamberError,
    tables::{ControlPointTable, CsvTable, FunctionColumns, VariableColumns},
};

/// Reserved variable name the optimizer uses for the angle-of-attack
/// boundary parameter. Rows with any other name address control points.
pub const ALPHA_VARIABLE: &str = "alpha";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeCycle {
    Idle,
    VariablesLoaded,
    Written,
}

/// File-based exchange between an external optimizer and the flow engine.
/// One instance serves one optimizer iteration at a time: read the
/// independent-variable file (pushing the new design into the engine),
/// let the caller solve, then write values and gradients back into the
/// dependent-variable file.
pub struct OptimizationBridge<E: FlowEngine> {
    engine: E,
    variable_columns: VariableColumns,
    function_columns: FunctionColumns,
    variables: Vec<DesignVariable>,
    objectives: FunctionSet,
    inequalities: FunctionSet,
    equalities: FunctionSet,
    cycle: BridgeCycle,
}

struct StagedVariable {
    name: String,
    role: VariableRole,
    current: f64,
    initial: f64,
    min: f64,
    max: f64,
    typical: f64,
}

impl<E: FlowEngine> OptimizationBridge<E> {
    pub fn new(
        engine: E,
        variable_columns: VariableColumns,
        function_columns: FunctionColumns,
    ) -> OptimizationBridge<E> {
        OptimizationBridge {
            engine,
            variable_columns,
            function_columns,
            variables: Vec::new(),
            objectives: FunctionSet::new(),
            inequalities: FunctionSet::new(),
            equalities: FunctionSet::new(),
            cycle: BridgeCycle::Idle,
        }
    }

    /// Reads the independent-variable file and pushes the new design into
    /// the engine. The whole file is parsed before the engine or the
    /// installed variable list is touched; a malformed row aborts with no
    /// partial state. The rebuilt list replaces any prior list wholesale.
    ///
    /// # Arguments
    /// * `path` - The path to the independent-variable csv file
    pub fn read_independent_variables(&mut self, path: &str) -> Result<(), CamberError> {
        let table = CsvTable::open(path)?;
        let columns = &self.variable_columns;

        let name_col = table.column(&columns.name)?;
        let current_col = table.column(&columns.current)?;
        let initial_col = table.column(&columns.initial)?;
        let min_col = table.column(&columns.min)?;
        let max_col = table.column(&columns.max)?;
        let typical_col = table.column(&columns.typical)?;
        let table_id_col = table.column(&columns.table)?;
        let table_row_col = table.column(&columns.table_row)?;
        let table_col_col = table.column(&columns.table_col)?;

        // Stage-parse every row up front
        let mut staged: Vec<StagedVariable> = Vec::new();
        let mut saw_alpha = false;

        for row in 1..table.num_rows() {
            let name = table.value(row, name_col)?.to_string();

            let role = if name == ALPHA_VARIABLE {
                if saw_alpha {
                    return Err(CamberError::Parse(format!(
                        "Duplicate {} row in csv file {}",
                        ALPHA_VARIABLE, path
                    )));
                }
                saw_alpha = true;

                // table address cells are ignored on the alpha row
                VariableRole::BoundaryParameter(BoundaryParameter::AngleOfAttack)
            } else {
                let table_id = table.value(row, table_id_col)?.to_string();
                let table_row = parse_index(&table, row, table_row_col, &columns.table_row)?;
                let coord_col = parse_index(&table, row, table_col_col, &columns.table_col)?;

                ControlPointTable::delta_column(coord_col)?;

                VariableRole::ControlPoint {
                    table: table_id,
                    row: table_row,
                    col: coord_col,
                }
            };

            staged.push(StagedVariable {
                name,
                role,
                current: table.parse_f64(row, current_col, &columns.current)?,
                initial: table.parse_f64(row, initial_col, &columns.initial)?,
                min: table.parse_f64(row, min_col, &columns.min)?,
                max: table.parse_f64(row, max_col, &columns.max)?,
                typical: table.parse_f64(row, typical_col, &columns.typical)?,
            });
        }

        // Commit: boundary parameters go to the engine as their row lands,
        // control points go out in a single batch after the loop
        let mut variables: Vec<DesignVariable> = Vec::new();
        for item in staged {
            if let VariableRole::BoundaryParameter(BoundaryParameter::AngleOfAttack) = item.role {
                self.engine.set_angle_of_attack(item.current)?;
            }

            variables.push(DesignVariable::new(
                item.name,
                item.role,
                item.current,
                item.initial,
                item.min,
                item.max,
                item.typical,
            ));
        }

        let control_points: Vec<DesignVariable> = variables
            .iter()
            .filter(|v| matches!(v.role, VariableRole::ControlPoint { .. }))
            .cloned()
            .collect();
        self.engine.update_control_points(&control_points)?;

        println!(
            "info: loaded {} design variables from {}",
            variables.len(),
            path
        );

        self.variables = variables;
        self.cycle = BridgeCycle::VariablesLoaded;

        Ok(())
    }

    /// Evaluates the functions listed in the dependent-variable file and
    /// writes their values (and, when requested, gradients) back into it.
    /// Each cell update is an independent read-modify-write, so cells
    /// written before a failure stay on disk.
    ///
    /// # Arguments
    /// * `path` - The path to the dependent-variable csv file
    /// * `include_gradients` - Whether to assemble d(function)/d(variable)
    ///   gradients from the adjoint solution
    pub fn write_dependent_variables(
        &mut self,
        path: &str,
        include_gradients: bool,
    ) -> Result<(), CamberError> {
        let mut table = CsvTable::open(path)?;
        let kind_col = table.column(&self.function_columns.kind)?;
        let name_col = table.column(&self.function_columns.name)?;

        // Classify rows, preserving file order within each kind
        self.objectives = FunctionSet::new();
        self.inequalities = FunctionSet::new();
        self.equalities = FunctionSet::new();

        for row in 1..table.num_rows() {
            let kind_label = table.value(row, kind_col)?;
            let name = table.value(row, name_col)?.to_string();

            match FunctionKind::from_label(kind_label) {
                Some(FunctionKind::Objective) => self.objectives.names.push(name),
                Some(FunctionKind::Inequality) => self.inequalities.names.push(name),
                Some(FunctionKind::Equality) => self.equalities.names.push(name),
                None => {
                    println!(
                        "warning [bridge]: skipping row with unknown function type '{}' in {}",
                        kind_label, path
                    );
                }
            }
        }

        // Fetch values, objectives first
        fetch_values(&mut self.engine, &mut self.objectives)?;
        fetch_values(&mut self.engine, &mut self.inequalities)?;
        fetch_values(&mut self.engine, &mut self.equalities)?;

        if include_gradients {
            let total = self.num_functions() * self.variables.len();
            let bar = ProgressBar::new(total as u64);

            fetch_gradients(&mut self.engine, &mut self.objectives, &self.variables, &bar)?;
            fetch_gradients(
                &mut self.engine,
                &mut self.inequalities,
                &self.variables,
                &bar,
            )?;
            fetch_gradients(&mut self.engine, &mut self.equalities, &self.variables, &bar)?;

            bar.finish_with_message(format!(
                "info: assembled gradients for {} functions\n",
                self.num_functions()
            ));
        }

        // Write back: objectives, equalities, then inequalities
        write_function_set(
            &mut table,
            &self.function_columns,
            &self.objectives,
            &self.variables,
        )?;
        write_function_set(
            &mut table,
            &self.function_columns,
            &self.equalities,
            &self.variables,
        )?;
        write_function_set(
            &mut table,
            &self.function_columns,
            &self.inequalities,
            &self.variables,
        )?;

        println!(
            "info: wrote {} function values to {}",
            self.num_functions(),
            path
        );

        self.cycle = BridgeCycle::Written;

        Ok(())
    }

    /// Overwrites the current value of each design variable, in list
    /// order. For in-process callers that step the design between a read
    /// and an evaluation.
    pub fn update_design_variables(&mut self, values: &[f64]) -> Result<(), CamberError> {
        if values.len() != self.variables.len() {
            return Err(CamberError::Config(format!(
                "Expected {} design variable values, got {}",
                self.variables.len(),
                values.len()
            )));
        }

        for (variable, value) in self.variables.iter_mut().zip(values) {
            variable.current = *value;
        }

        Ok(())
    }

    pub fn design_variable_values(&self) -> DVector<f64> {
        DVector::from_iterator(self.variables.len(), self.variables.iter().map(|v| v.current))
    }

    pub fn typical_values(&self) -> DVector<f64> {
        DVector::from_iterator(self.variables.len(), self.variables.iter().map(|v| v.typical))
    }

    pub fn lower_bounds(&self) -> DVector<f64> {
        DVector::from_iterator(self.variables.len(), self.variables.iter().map(|v| v.min))
    }

    pub fn upper_bounds(&self) -> DVector<f64> {
        DVector::from_iterator(self.variables.len(), self.variables.iter().map(|v| v.max))
    }

    pub fn variables(&self) -> &[DesignVariable] {
        &self.variables
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_functions(&self) -> usize {
        self.objectives.len() + self.inequalities.len() + self.equalities.len()
    }

    pub fn objectives(&self) -> &FunctionSet {
        &self.objectives
    }

    pub fn inequalities(&self) -> &FunctionSet {
        &self.inequalities
    }

    pub fn equalities(&self) -> &FunctionSet {
        &self.equalities
    }

    pub fn cycle(&self) -> BridgeCycle {
        self.cycle
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }
}

fn parse_index(
    table: &CsvTable,
    row: usize,
    col: usize,
    column_name: &str,
) -> Result<usize, CamberError> {
    let raw = table.value(row, col)?;

    match raw.parse::<usize>() {
        Ok(value) => Ok(value),
        Err(_err) => Err(CamberError::Parse(format!(
            "Non-integer {} value '{}' in csv file {}",
            column_name,
            raw,
            table.path()
        ))),
    }
}

fn fetch_values<E: FlowEngine>(engine: &mut E, set: &mut FunctionSet) -> Result<(), CamberError> {
    let mut values: Vec<f64> = Vec::with_capacity(set.names.len());

    for name in &set.names {
        values.push(engine.function_value(name)?);
    }

    set.values = DVector::from_vec(values);
    Ok(())
}

fn fetch_gradients<E: FlowEngine>(
    engine: &mut E,
    set: &mut FunctionSet,
    variables: &[DesignVariable],
    bar: &ProgressBar,
) -> Result<(), CamberError> {
    let mut gradients = DMatrix::zeros(set.names.len(), variables.len());

    for (i, name) in set.names.iter().enumerate() {
        for (j, variable) in variables.iter().enumerate() {
            gradients[(i, j)] = engine.partial_derivative(name, variable)?;
            bar.inc(1);
        }
    }

    set.gradients = Some(gradients);
    Ok(())
}

fn write_function_set(
    table: &mut CsvTable,
    columns: &FunctionColumns,
    set: &FunctionSet,
    variables: &[DesignVariable],
) -> Result<(), CamberError> {
    let name_col = table.column(&columns.name)?;
    let value_col = table.column(&columns.value)?;

    for (i, name) in set.names.iter().enumerate() {
        let row = match table.find_row(name_col, name) {
            Some(row) => row,
            None => {
                return Err(CamberError::Io(format!(
                    "Error in csv file {}: no row for function {}",
                    table.path(),
                    name
                )))
            }
        };

        table.update_f64(row, value_col, set.values[i])?;

        if let Some(gradients) = &set.gradients {
            for (j, variable) in variables.iter().enumerate() {
                let column_name = format!("{}{}", columns.gradient_prefix, variable.name);
                let col = table.column(&column_name)?;
                table.update_f64(row, col, gradients[(i, j)])?;
            }
        }
    }

    Ok(())
}
