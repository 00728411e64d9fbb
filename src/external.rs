use std::io::Write;

use crate::{
    config::RunSettings,
    datatypes::{
        BoundaryParameter, CellErrorField, CellSample, DesignVariable, MeshTopology, SizeTable,
        VariableRole,
    },
    engine::{EngineError, FlowEngine},
    error::CamberError,
    tables::ControlPointTable,
};

/// Adapter that forwards every `FlowEngine` call to a vendor driver
/// command. The driver is invoked once per call with a subcommand and
/// runs inside the session directory; scalar results come back as the
/// last stdout line, bulk data through CSV files:
///
/// * control-point tables are `<table>.csv`, written before `morph`;
/// * gradient tables are read from `<function>_Gradients_<table>.csv`;
/// * size tables are written to `mesh_refinement.csv` before `remesh`;
/// * error fields are exported to `error_field.csv`.
///
/// A driver line starting with `absent:` names a missing engine-side
/// object; a non-zero exit is any other failure.
pub struct ExternalEngine {
    command: String,
    session_dir: String,
    topology: MeshTopology,
}

impl ExternalEngine {
    pub fn new(command: &str, session_dir: &str, topology: MeshTopology) -> ExternalEngine {
        ExternalEngine {
            command: command.to_string(),
            session_dir: session_dir.to_string(),
            topology,
        }
    }

    pub fn from_settings(settings: &RunSettings) -> ExternalEngine {
        ExternalEngine::new(
            &settings.engine_command,
            &settings.session_dir,
            settings.mesh_topology,
        )
    }

    /// Invokes the driver with a subcommand and arguments
    fn invoke(&self, args: &[&str]) -> Result<String, EngineError> {
        let output = match std::process::Command::new(&self.command)
            .args(args)
            .current_dir(&self.session_dir)
            .output()
        {
            Ok(out) => out,
            Err(err) => {
                return Err(EngineError::Failed(format!(
                    "Driver {} failed to start: {err}",
                    self.command
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        // an absence report takes precedence over the exit status
        if let Some(what) = absent_marker(&stdout) {
            return Err(EngineError::Absent(what));
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Failed(format!(
                "Driver {} {} exited with {}: {}",
                self.command,
                args.first().unwrap_or(&""),
                output.status,
                stderr.trim()
            )));
        }

        Ok(stdout)
    }

    fn session_path(&self, name: &str) -> String {
        format!("{}/{}", self.session_dir, name)
    }
}

impl FlowEngine for ExternalEngine {
    fn set_angle_of_attack(&mut self, degrees: f64) -> Result<(), EngineError> {
        self.invoke(&["set-alpha", &format!("{}", degrees)])?;
        Ok(())
    }

    fn function_value(&mut self, name: &str) -> Result<f64, EngineError> {
        let stdout = self.invoke(&["report", name])?;
        parse_scalar(&stdout)
    }

    fn partial_derivative(
        &mut self,
        function: &str,
        variable: &DesignVariable,
    ) -> Result<f64, EngineError> {
        match &variable.role {
            VariableRole::BoundaryParameter(BoundaryParameter::AngleOfAttack) => {
                let stdout = self.invoke(&["alpha-gradient", function])?;
                parse_scalar(&stdout)
            }
            VariableRole::ControlPoint { table, row, col } => {
                let path = self.session_path(&format!("{}_Gradients_{}.csv", function, table));
                let gradients = ControlPointTable::open(&path).map_err(table_error)?;
                gradients.value_at(*row, *col).map_err(table_error)
            }
        }
    }

    fn update_control_points(&mut self, variables: &[DesignVariable]) -> Result<(), EngineError> {
        for variable in variables {
            if let VariableRole::ControlPoint { table, row, col } = &variable.role {
                let path = self.session_path(&format!("{}.csv", table));
                let mut table_csv = ControlPointTable::open(&path).map_err(table_error)?;
                table_csv
                    .set_delta(*row, *col, variable.current)
                    .map_err(table_error)?;

                println!(
                    "info: design variable {} = {}",
                    variable.name, variable.current
                );
            }
        }

        self.invoke(&["morph"])?;
        Ok(())
    }

    fn run_primal(&mut self, steps: u32) -> Result<(), EngineError> {
        self.invoke(&["solve-primal", &steps.to_string()])?;
        Ok(())
    }

    fn restart_primal(&mut self, steps: u32) -> Result<(), EngineError> {
        self.invoke(&["restart-primal", &steps.to_string()])?;
        Ok(())
    }

    fn run_adjoint(&mut self, steps: u32) -> Result<(), EngineError> {
        self.invoke(&["solve-adjoint", &steps.to_string()])?;
        Ok(())
    }

    fn run_adjoint_warm_start(
        &mut self,
        first_order_steps: u32,
        second_order_steps: u32,
    ) -> Result<(), EngineError> {
        self.invoke(&[
            "solve-adjoint-warm",
            &first_order_steps.to_string(),
            &second_order_steps.to_string(),
        ])?;
        Ok(())
    }

    fn remesh(&mut self, size_table: Option<&SizeTable>) -> Result<(), EngineError> {
        match size_table {
            Some(table) => {
                let path = self.session_path("mesh_refinement.csv");
                write_size_table(&path, table).map_err(table_error)?;
                self.invoke(&["remesh", "mesh_refinement.csv"])?;
            }
            None => {
                self.invoke(&["remesh"])?;
            }
        }

        Ok(())
    }

    fn prepare_error_indicators(&mut self, functional: &str) -> Result<(), EngineError> {
        self.invoke(&["prepare-indicators", functional])?;
        Ok(())
    }

    fn adjoint_error_field(&mut self, functional: &str) -> Result<CellErrorField, EngineError> {
        self.invoke(&["export-error-field", functional, "error_field.csv"])?;

        let path = self.session_path("error_field.csv");
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_err) => {
                return Err(EngineError::Failed(format!(
                    "Driver did not write error field export {}",
                    path
                )));
            }
        };

        parse_error_field(&contents, self.topology)
    }

    fn clear_adaptation_artifacts(&mut self) -> Result<(), EngineError> {
        self.invoke(&["clear-indicators"])?;
        Ok(())
    }

    fn save_state(&mut self, tag: &str) -> Result<(), EngineError> {
        self.invoke(&["save", tag])?;
        Ok(())
    }
}

fn table_error(err: CamberError) -> EngineError {
    EngineError::Failed(err.to_string())
}

/// Extracts the payload of an `absent:` marker line, if any
fn absent_marker(stdout: &str) -> Option<String> {
    for line in stdout.lines() {
        if let Some(rest) = line.trim().strip_prefix("absent:") {
            return Some(rest.trim().to_string());
        }
    }

    None
}

/// Parses the last non-empty stdout line as a float
fn parse_scalar(stdout: &str) -> Result<f64, EngineError> {
    let last = match stdout.lines().rev().find(|line| !line.trim().is_empty()) {
        Some(line) => line.trim(),
        None => {
            return Err(EngineError::Failed(
                "Driver returned no output".to_string(),
            ))
        }
    };

    match last.parse::<f64>() {
        Ok(value) => Ok(value),
        Err(_err) => Err(EngineError::Failed(format!(
            "Non-numeric driver result '{}'",
            last
        ))),
    }
}

/// Parses an exported error-field CSV into cell samples
///
/// # Arguments
/// * `contents` - The export file contents (x,y,z,volume,error,prism)
/// * `topology` - The topology tag for the resulting field
fn parse_error_field(
    contents: &str,
    topology: MeshTopology,
) -> Result<CellErrorField, EngineError> {
    let mut headers: Vec<&str> = Vec::new();
    let mut x_index: usize = 0;
    let mut y_index: usize = 0;
    let mut z_index: usize = 0;
    let mut volume_index: usize = 0;
    let mut error_index: usize = 0;
    let mut prism_index: usize = 0;
    let mut cells: Vec<CellSample> = Vec::new();

    for line in contents.split("\n") {
        if line.trim().is_empty() {
            continue;
        }

        if headers.is_empty() {
            headers = line.split(",").map(|x| x.trim()).collect();

            for required in ["x", "y", "z", "volume", "error", "prism"] {
                if !headers.contains(&required) {
                    return Err(EngineError::Failed(format!(
                        "Error field export missing {} column",
                        required
                    )));
                }
            }

            x_index = headers.iter().position(|f| f == &"x").unwrap();
            y_index = headers.iter().position(|f| f == &"y").unwrap();
            z_index = headers.iter().position(|f| f == &"z").unwrap();
            volume_index = headers.iter().position(|f| f == &"volume").unwrap();
            error_index = headers.iter().position(|f| f == &"error").unwrap();
            prism_index = headers.iter().position(|f| f == &"prism").unwrap();
        } else {
            let row: Vec<&str> = line.split(",").map(|x| x.trim()).collect();

            cells.push(CellSample {
                centroid: [
                    parse_field_value(&row, x_index, "x")?,
                    parse_field_value(&row, y_index, "y")?,
                    parse_field_value(&row, z_index, "z")?,
                ],
                volume: parse_field_value(&row, volume_index, "volume")?,
                error_estimate: parse_field_value(&row, error_index, "error")?,
                prism: parse_field_value(&row, prism_index, "prism")? > 0.5,
            });
        }
    }

    if headers.is_empty() {
        return Err(EngineError::Failed(
            "Error field export is empty".to_string(),
        ));
    }

    Ok(CellErrorField { topology, cells })
}

fn parse_field_value(row: &[&str], index: usize, column: &str) -> Result<f64, EngineError> {
    let raw = match row.get(index) {
        Some(value) => *value,
        None => {
            return Err(EngineError::Failed(format!(
                "Error field export missing {} cell",
                column
            )))
        }
    };

    match raw.parse::<f64>() {
        Ok(value) => Ok(value),
        Err(_err) => Err(EngineError::Failed(format!(
            "Non-numeric {} value '{}' in error field export",
            column, raw
        ))),
    }
}

/// Writes a size table in the shape the driver's mesher consumes
fn write_size_table(path: &str, table: &SizeTable) -> Result<(), CamberError> {
    let mut file = match std::fs::File::create(path) {
        Ok(f) => f,
        Err(err) => {
            return Err(CamberError::Io(format!(
                "Failed to create size table {}: {err}",
                path
            )));
        }
    };

    file.write("X,Y,Z,NewSize\n".as_bytes()).unwrap();
    for entry in &table.entries {
        file.write(format!("{},{},{},{}\n", entry.x, entry.y, entry.z, entry.size).as_bytes())
            .unwrap();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::SizeEntry;

    use approx::assert_relative_eq;

    #[test]
    fn absent_marker_is_detected_anywhere_in_stdout() {
        let stdout = "loading simulation\nabsent: Adjoint Cost Function CD\n";
        assert_eq!(
            absent_marker(stdout),
            Some("Adjoint Cost Function CD".to_string())
        );
        assert_eq!(absent_marker("solver converged\n0.02\n"), None);
    }

    #[test]
    fn scalar_comes_from_the_last_non_empty_line() {
        assert_relative_eq!(
            parse_scalar("iteration 400\nconverged\n0.0254\n\n").unwrap(),
            0.0254
        );
        assert!(matches!(
            parse_scalar("all good\n"),
            Err(EngineError::Failed(_))
        ));
        assert!(matches!(parse_scalar(""), Err(EngineError::Failed(_))));
    }

    #[test]
    fn error_field_parses_by_header_name() {
        // column order deliberately shuffled
        let contents = "volume,x,y,z,prism,error\n\
                        2.0,0.1,0.2,0.0,0,0.003\n\
                        1.0,0.4,0.5,0.0,1,-0.001\n";

        let field = parse_error_field(contents, MeshTopology::Polyhedral).unwrap();

        assert_eq!(field.topology, MeshTopology::Polyhedral);
        assert_eq!(field.cells.len(), 2);
        assert_relative_eq!(field.cells[0].volume, 2.0);
        assert_relative_eq!(field.cells[0].error_estimate, 0.003);
        assert!(!field.cells[0].prism);
        assert!(field.cells[1].prism);
        assert_relative_eq!(field.cells[1].centroid[0], 0.4);
    }

    #[test]
    fn error_field_rejects_bad_exports() {
        assert!(matches!(
            parse_error_field("x,y,z,volume,error\n", MeshTopology::Tetrahedral),
            Err(EngineError::Failed(_))
        ));
        assert!(matches!(
            parse_error_field(
                "x,y,z,volume,error,prism\n1,2,3,four,0.1,0\n",
                MeshTopology::Tetrahedral
            ),
            Err(EngineError::Failed(_))
        ));
        assert!(matches!(
            parse_error_field("", MeshTopology::Tetrahedral),
            Err(EngineError::Failed(_))
        ));
    }

    #[test]
    fn size_table_writes_driver_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh_refinement.csv");

        let table = SizeTable {
            entries: vec![
                SizeEntry {
                    x: 1.0,
                    y: 2.0,
                    z: 0.0,
                    size: 0.5,
                },
                SizeEntry {
                    x: 3.0,
                    y: 4.0,
                    z: 0.0,
                    size: 0.25,
                },
            ],
        };
        write_size_table(path.to_str().unwrap(), &table).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "X,Y,Z,NewSize\n1,2,0,0.5\n3,4,0,0.25\n");
    }

    #[test]
    fn control_point_partials_read_the_gradient_table() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("CD_Gradients_Upper.csv"),
            "dX,dY,dZ,X,Y,Z\n0,0.011,0,1.0,0.1,0\n0,0.025,0,1.5,0.2,0\n",
        )
        .unwrap();

        let mut engine = ExternalEngine::new(
            "unused-driver",
            dir.path().to_str().unwrap(),
            MeshTopology::TwoDimensional,
        );

        let variable = DesignVariable::new(
            "cp1".to_string(),
            VariableRole::ControlPoint {
                table: "Upper".to_string(),
                row: 1,
                col: 4,
            },
            0.0,
            0.0,
            -1.0,
            1.0,
            0.1,
        );

        assert_relative_eq!(
            engine.partial_derivative("CD", &variable).unwrap(),
            0.025
        );
    }

    #[test]
    fn control_points_are_written_before_the_morph_call() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Upper.csv"),
            "dX,dY,dZ,X,Y,Z\n0,0,0,1.0,0.1,0\n",
        )
        .unwrap();

        let mut engine = ExternalEngine::new(
            "/nonexistent/driver",
            dir.path().to_str().unwrap(),
            MeshTopology::TwoDimensional,
        );

        let variable = DesignVariable::new(
            "cp0".to_string(),
            VariableRole::ControlPoint {
                table: "Upper".to_string(),
                row: 0,
                col: 4,
            },
            0.004,
            0.0,
            -1.0,
            1.0,
            0.1,
        );

        // the morph subprocess cannot start, but the table edit lands first
        let result = engine.update_control_points(&[variable]);
        assert!(matches!(result, Err(EngineError::Failed(_))));

        let contents = std::fs::read_to_string(dir.path().join("Upper.csv")).unwrap();
        assert!(contents.contains("0,0.004,0,1.0,0.1,0"));
    }

    #[test]
    fn driver_start_failure_is_a_failed_error() {
        let mut engine = ExternalEngine::new(
            "/nonexistent/driver",
            ".",
            MeshTopology::TwoDimensional,
        );

        assert!(matches!(
            engine.function_value("CD"),
            Err(EngineError::Failed(_))
        ));
    }
}
