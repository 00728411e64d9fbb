use json::JsonValue;

use crate::{
    adapt::{AdaptationParams, AdjointSchedule},
    datatypes::MeshTopology,
    error::CamberError,
    tables::{FunctionColumns, VariableColumns},
};

pub const DEFAULT_PRIMAL_STEPS: u32 = 1000;
pub const DEFAULT_FIRST_ORDER_STEPS: u32 = 25;
pub const DEFAULT_SECOND_ORDER_STEPS: u32 = 15;
pub const DEFAULT_ADAPTATION_LEVELS: u32 = 3;

/// Everything a run needs, loaded from the JSON settings file. Only the
/// exchange-file paths and the engine command are required; the rest
/// falls back to stock values.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub independent_variables: String,
    pub dependent_variables: String,
    pub engine_command: String,
    pub session_dir: String,
    pub mesh_topology: MeshTopology,
    pub primal_steps: u32,
    pub adjoint: AdjointSchedule,
    pub gradients: bool,
    pub adaptation: AdaptationParams,
    pub adaptation_levels: u32,
    pub variable_columns: VariableColumns,
    pub function_columns: FunctionColumns,
}

/// Loads and validates the run-settings file
///
/// # Arguments
/// * `path` - The path to the settings json file
///
/// # Returns
/// A RunSettings instance with defaults filled in
pub fn load_run_settings(path: &str) -> Result<RunSettings, CamberError> {
    let file_string = match std::fs::read_to_string(path) {
        Ok(f) => f,
        Err(_err) => {
            return Err(CamberError::Config(format!(
                "Unable to open settings file {}",
                path
            )))
        }
    };

    let settings = match json::parse(&file_string) {
        Ok(f) => f,
        Err(err) => {
            return Err(CamberError::Config(format!(
                "Error in settings json: {err}"
            )))
        }
    };

    if !settings.has_key("files") {
        return Err(CamberError::Config(
            "Settings json missing files section".to_string(),
        ));
    }
    if !settings.has_key("engine") {
        return Err(CamberError::Config(
            "Settings json missing engine section".to_string(),
        ));
    }

    let independent_variables = match settings["files"]["independent_variables"].as_str() {
        Some(value) => value.to_string(),
        None => {
            return Err(CamberError::Config(
                "Settings json missing independent_variables field in files section".to_string(),
            ))
        }
    };
    let dependent_variables = match settings["files"]["dependent_variables"].as_str() {
        Some(value) => value.to_string(),
        None => {
            return Err(CamberError::Config(
                "Settings json missing dependent_variables field in files section".to_string(),
            ))
        }
    };
    let engine_command = match settings["engine"]["command"].as_str() {
        Some(value) => value.to_string(),
        None => {
            return Err(CamberError::Config(
                "Settings json missing command field in engine section".to_string(),
            ))
        }
    };

    let session_dir = parse_optional_str(&settings["engine"], "session_dir", ".")?;

    let topology_label = parse_optional_str(&settings["engine"], "mesh_topology", "two-dimensional")?;
    let mesh_topology = match MeshTopology::from_label(&topology_label) {
        Some(topology) => topology,
        None => {
            return Err(CamberError::Config(format!(
                "Unknown mesh_topology '{}' in settings json",
                topology_label
            )))
        }
    };

    let primal_steps = parse_optional_u32(&settings["primal"], "steps", DEFAULT_PRIMAL_STEPS)?;

    let adjoint = AdjointSchedule {
        first_order_steps: parse_optional_u32(
            &settings["adjoint"],
            "first_order_steps",
            DEFAULT_FIRST_ORDER_STEPS,
        )?,
        second_order_steps: parse_optional_u32(
            &settings["adjoint"],
            "second_order_steps",
            DEFAULT_SECOND_ORDER_STEPS,
        )?,
    };
    let gradients = parse_optional_bool(&settings["adjoint"], "gradients", true)?;

    let stock = AdaptationParams::default();
    let adaptation_section = &settings["adaptation"];
    let eta_ceiling = if adaptation_section.has_key("eta_ceiling") {
        match adaptation_section["eta_ceiling"].as_f64() {
            Some(value) => Some(value),
            None => {
                return Err(CamberError::Config(
                    "Invalid eta_ceiling value in settings json".to_string(),
                ))
            }
        }
    } else {
        None
    };
    let adaptation = AdaptationParams {
        functional: parse_optional_str(adaptation_section, "functional", &stock.functional)?,
        target_error: parse_optional_f64(adaptation_section, "target_error", stock.target_error)?,
        max_size_change: parse_optional_f64(
            adaptation_section,
            "max_size_change",
            stock.max_size_change,
        )?,
        eta_floor: parse_optional_f64(adaptation_section, "eta_floor", stock.eta_floor)?,
        eta_ceiling,
    };
    let adaptation_levels =
        parse_optional_u32(adaptation_section, "levels", DEFAULT_ADAPTATION_LEVELS)?;

    let mut variable_columns = VariableColumns::default();
    let mut function_columns = FunctionColumns::default();

    if settings.has_key("headers") {
        let headers = &settings["headers"];

        override_column(headers, "var_name", &mut variable_columns.name)?;
        override_column(headers, "x", &mut variable_columns.current)?;
        override_column(headers, "x_initial", &mut variable_columns.initial)?;
        override_column(headers, "x_min", &mut variable_columns.min)?;
        override_column(headers, "x_max", &mut variable_columns.max)?;
        override_column(headers, "typical_x", &mut variable_columns.typical)?;
        override_column(headers, "table_id", &mut variable_columns.table)?;
        override_column(headers, "table_row", &mut variable_columns.table_row)?;
        override_column(headers, "table_col", &mut variable_columns.table_col)?;

        override_column(headers, "function_type", &mut function_columns.kind)?;
        override_column(headers, "function_name", &mut function_columns.name)?;
        override_column(headers, "function_value", &mut function_columns.value)?;
        override_column(headers, "gradient_prefix", &mut function_columns.gradient_prefix)?;
    }

    Ok(RunSettings {
        independent_variables,
        dependent_variables,
        engine_command,
        session_dir,
        mesh_topology,
        primal_steps,
        adjoint,
        gradients,
        adaptation,
        adaptation_levels,
        variable_columns,
        function_columns,
    })
}

fn parse_optional_str(
    section: &JsonValue,
    key: &str,
    default: &str,
) -> Result<String, CamberError> {
    if !section.has_key(key) {
        return Ok(default.to_string());
    }

    match section[key].as_str() {
        Some(value) => Ok(value.to_string()),
        None => Err(CamberError::Config(format!(
            "Invalid {} value in settings json",
            key
        ))),
    }
}

fn parse_optional_u32(section: &JsonValue, key: &str, default: u32) -> Result<u32, CamberError> {
    if !section.has_key(key) {
        return Ok(default);
    }

    match section[key].as_u32() {
        Some(value) => Ok(value),
        None => Err(CamberError::Config(format!(
            "Invalid {} value in settings json",
            key
        ))),
    }
}

fn parse_optional_f64(section: &JsonValue, key: &str, default: f64) -> Result<f64, CamberError> {
    if !section.has_key(key) {
        return Ok(default);
    }

    match section[key].as_f64() {
        Some(value) => Ok(value),
        None => Err(CamberError::Config(format!(
            "Invalid {} value in settings json",
            key
        ))),
    }
}

fn parse_optional_bool(section: &JsonValue, key: &str, default: bool) -> Result<bool, CamberError> {
    if !section.has_key(key) {
        return Ok(default);
    }

    match section[key].as_bool() {
        Some(value) => Ok(value),
        None => Err(CamberError::Config(format!(
            "Invalid {} value in settings json",
            key
        ))),
    }
}

fn override_column(
    section: &JsonValue,
    key: &str,
    target: &mut String,
) -> Result<(), CamberError> {
    if !section.has_key(key) {
        return Ok(());
    }

    match section[key].as_str() {
        Some(value) => {
            *target = value.to_string();
            Ok(())
        }
        None => Err(CamberError::Config(format!(
            "Invalid {} value in settings json headers section",
            key
        ))),
    }
}
