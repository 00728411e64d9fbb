// Mesh refinement follows the functional-output adaptation method of
// Venditti & Darmofal, "Grid Adaptation for Functional Outputs:
// Application to Two-Dimensional Inviscid Flows", J. Comput. Phys. 176
// (2002): cells are resized by the ratio of their local adjoint error
// to the campaign's target error.

use crate::{
    datatypes::{CellErrorField, MeshTopology, SizeEntry, SizeTable},
    engine::{EngineError, FlowEngine},
    error::CamberError,
};

pub const DEFAULT_FUNCTIONAL: &str = "CD";
pub const DEFAULT_TARGET_ERROR: f64 = 0.0005;
pub const DEFAULT_MAX_SIZE_CHANGE: f64 = 2.0;
pub const DEFAULT_ETA_FLOOR: f64 = 1e-3;

const SIZE_EXPONENT: f64 = 0.25;

#[derive(Debug, Clone)]
pub struct AdaptationParams {
    /// Functional output whose discretization error drives refinement
    pub functional: String,
    /// Campaign-wide error target the global ratio is measured against
    pub target_error: f64,
    /// Per-pass clamp on how much any cell may grow or shrink
    pub max_size_change: f64,
    /// Lower clamp on the local error ratio
    pub eta_floor: f64,
    /// Optional upper clamp on the local error ratio
    pub eta_ceiling: Option<f64>,
}

impl Default for AdaptationParams {
    fn default() -> AdaptationParams {
        AdaptationParams {
            functional: DEFAULT_FUNCTIONAL.to_string(),
            target_error: DEFAULT_TARGET_ERROR,
            max_size_change: DEFAULT_MAX_SIZE_CHANGE,
            eta_floor: DEFAULT_ETA_FLOOR,
            eta_ceiling: None,
        }
    }
}

/// How many iterations to spend in each adjoint discretization phase.
#[derive(Debug, Clone, Copy)]
pub struct AdjointSchedule {
    pub first_order_steps: u32,
    pub second_order_steps: u32,
}

impl AdjointSchedule {
    /// Runs the adjoint solver under the warm-start policy: when both
    /// phases have steps, a first-order pass seeds a second-order pass
    /// (the engine turns on its accelerated linear solver for this mode
    /// only); otherwise a single-phase run of the larger step count.
    pub fn run<E: FlowEngine>(&self, engine: &mut E) -> Result<(), EngineError> {
        if self.first_order_steps > 0 && self.second_order_steps > 0 {
            engine.run_adjoint_warm_start(self.first_order_steps, self.second_order_steps)
        } else {
            engine.run_adjoint(self.first_order_steps.max(self.second_order_steps))
        }
    }
}

/// Characteristic cell size from cell volume
///
/// # Arguments
/// * `topology` - The mesh topology the volume comes from
/// * `volume` - The cell volume (area for two-dimensional meshes)
pub fn characteristic_size(topology: MeshTopology, volume: f64) -> f64 {
    match topology {
        MeshTopology::TwoDimensional => 1.2 * volume.sqrt(),
        MeshTopology::Polyhedral => 1.2 * volume.cbrt(),
        MeshTopology::Tetrahedral => volume.cbrt(),
    }
}

/// Per-cell size change factor, clamped to
/// [1/max_size_change, max_size_change]. A degenerate all-zero error
/// field gives eta_g = 0 and pins every factor at max_size_change.
pub fn refinement_factor(eta_g: f64, eta_k: f64, max_size_change: f64) -> f64 {
    let raw = (1.0 / (eta_g * eta_k)).powf(SIZE_EXPONENT);
    f64::max(f64::min(raw, max_size_change), 1.0 / max_size_change)
}

#[derive(Debug, Clone)]
pub struct CellSizing {
    pub centroid: [f64; 3],
    pub prism: bool,
    pub epsilon_k: f64,
    pub h_k: f64,
    pub eta_k: f64,
    pub factor: f64,
    pub target_size: f64,
}

/// The sizing decisions for one adaptation pass: campaign-wide error
/// ratio plus one entry per cell of the error field.
#[derive(Debug, Clone)]
pub struct SizeField {
    pub eta_g: f64,
    pub mean_error: f64,
    pub cells: Vec<CellSizing>,
}

impl SizeField {
    /// Exports the non-prism rows as the size table handed to remesh.
    /// Prism cell sizes are governed by boundary-layer resolution, so
    /// they never appear in the table.
    pub fn to_size_table(&self) -> SizeTable {
        let entries = self
            .cells
            .iter()
            .filter(|cell| !cell.prism)
            .map(|cell| SizeEntry {
                x: cell.centroid[0],
                y: cell.centroid[1],
                z: cell.centroid[2],
                size: cell.target_size,
            })
            .collect();

        SizeTable { entries }
    }

    pub fn num_prism(&self) -> usize {
        self.cells.iter().filter(|cell| cell.prism).count()
    }
}

/// Computes the size field for one adaptation pass
///
/// # Arguments
/// * `field` - The engine-exported adjoint error field
/// * `params` - The campaign parameters
///
/// # Returns
/// A SizeField holding eta_g and the per-cell sizing decisions
pub fn compute_size_field(field: &CellErrorField, params: &AdaptationParams) -> SizeField {
    // Global ratio from the signed estimate sum; prism cells are left out
    // of both the sum and the volume-weighted mean
    let mut signed_sum: f64 = 0.0;
    let mut weighted_error: f64 = 0.0;
    let mut total_volume: f64 = 0.0;

    for cell in field.cells.iter().filter(|cell| !cell.prism) {
        signed_sum += cell.error_estimate;
        weighted_error += cell.error_estimate.abs() * cell.volume;
        total_volume += cell.volume;
    }

    let eta_g = signed_sum.abs() / params.target_error;
    let mean_error = if total_volume > 0.0 {
        weighted_error / total_volume
    } else {
        0.0
    };

    let mut cells: Vec<CellSizing> = Vec::with_capacity(field.cells.len());

    for sample in &field.cells {
        let epsilon_k = sample.error_estimate.abs();
        let h_k = characteristic_size(field.topology, sample.volume);

        let mut eta_k = if mean_error > 0.0 {
            f64::max(epsilon_k / mean_error, params.eta_floor)
        } else {
            params.eta_floor
        };
        if let Some(ceiling) = params.eta_ceiling {
            eta_k = f64::min(eta_k, ceiling);
        }

        let factor = if sample.prism {
            1.0
        } else {
            refinement_factor(eta_g, eta_k, params.max_size_change)
        };

        cells.push(CellSizing {
            centroid: sample.centroid,
            prism: sample.prism,
            epsilon_k,
            h_k,
            eta_k,
            factor,
            target_size: h_k * factor,
        });
    }

    SizeField {
        eta_g,
        mean_error,
        cells,
    }
}

/// Drives adjoint-based mesh refinement campaigns: alternating primal
/// and adjoint solves with error-directed re-meshing for a fixed number
/// of levels.
pub struct MeshAdaptationController<E: FlowEngine> {
    engine: E,
    params: AdaptationParams,
    schedule: AdjointSchedule,
    primal_steps: u32,
    size_field: Option<SizeField>,
}

impl<E: FlowEngine> MeshAdaptationController<E> {
    pub fn new(
        engine: E,
        params: AdaptationParams,
        schedule: AdjointSchedule,
        primal_steps: u32,
    ) -> MeshAdaptationController<E> {
        MeshAdaptationController {
            engine,
            params,
            schedule,
            primal_steps,
            size_field: None,
        }
    }

    pub fn size_field(&self) -> Option<&SizeField> {
        self.size_field.as_ref()
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

    /// Runs one adaptation campaign of `levels` refinement passes.
    /// An absent adjoint cost function downgrades the campaign to
    /// unsized re-meshing with a warning; any other engine failure
    /// aborts.
    pub fn run(&mut self, levels: u32) -> Result<(), CamberError> {
        println!(
            "info: starting adaptation campaign: {} levels on {} targeting error {}",
            levels, self.params.functional, self.params.target_error
        );

        self.clear()?;
        self.engine.remesh(None)?;

        let mut degraded = false;
        match self.engine.prepare_error_indicators(&self.params.functional) {
            Ok(()) => {}
            Err(EngineError::Absent(what)) => {
                println!(
                    "warning [adapt]: adjoint cost function '{}' is absent; continuing without error indicators",
                    what
                );
                degraded = true;
            }
            Err(err) => return Err(CamberError::Engine(err)),
        }

        self.engine.restart_primal(self.primal_steps)?;
        self.schedule.run(&mut self.engine)?;
        self.engine.save_state("Initial")?;

        for level in 1..=levels {
            println!("***********************");
            println!("**ADAPTATION LEVEL {}**", level);
            println!("***********************");

            let table = if degraded {
                None
            } else {
                self.refine_table(level)?
            };

            self.engine.remesh(table.as_ref())?;
            self.engine.restart_primal(self.primal_steps)?;
            self.schedule.run(&mut self.engine)?;
            self.engine.save_state("Adapted")?;
        }

        self.clear()?;

        println!("info: adaptation campaign complete");
        Ok(())
    }

    /// Fetches the error field and computes this level's size table.
    /// An absent cost function degrades to unsized re-meshing.
    fn refine_table(&mut self, level: u32) -> Result<Option<SizeTable>, CamberError> {
        match self.engine.adjoint_error_field(&self.params.functional) {
            Ok(field) => {
                let size_field = compute_size_field(&field, &self.params);
                println!(
                    "info: level {}: {} cells ({} prism), eta_g = {:.4}",
                    level,
                    size_field.cells.len(),
                    size_field.num_prism(),
                    size_field.eta_g
                );

                let table = size_field.to_size_table();
                self.size_field = Some(size_field);
                Ok(Some(table))
            }
            Err(EngineError::Absent(what)) => {
                println!(
                    "warning [adapt]: adjoint cost function '{}' is absent; re-meshing without a size field",
                    what
                );
                Ok(None)
            }
            Err(err) => Err(CamberError::Engine(err)),
        }
    }

    /// Drops the held size field and removes engine-side indicator
    /// artifacts. Safe to call repeatedly; a second call in a row finds
    /// nothing left to remove.
    pub fn clear(&mut self) -> Result<(), CamberError> {
        self.size_field = None;
        self.engine.clear_adaptation_artifacts()?;
        Ok(())
    }
}
