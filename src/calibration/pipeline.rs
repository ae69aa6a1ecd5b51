use crate::calibration::config::OptimizationConfig;
use crate::calibration::types::{clamp_to_bounds, ModelCalibrator};
use cmaes_lbfgsb::cmaes::{canonical_cmaes_optimize, CmaesCanonicalConfig};
use cmaes_lbfgsb::lbfgsb_optimize::lbfgsb_optimize;
use rand::Rng;

/// Global search with CMA-ES (skipped when an initial guess is supplied) followed by
/// L-BFGS-B refinement of the best point. Returns `(objective, params)`.
pub fn calibrate_model(
    model: &dyn ModelCalibrator,
    config: &OptimizationConfig,
    initial_guess: Option<Vec<f64>>,
) -> (f64, Vec<f64>) {
    let bounds = model.param_bounds();
    let obj_fn = |x: &[f64]| model.evaluate_objective(x);

    let (best_obj, best_sol) = match initial_guess {
        Some(guess) => {
            let guess = clamp_to_bounds(&guess, bounds);
            let guess_obj = obj_fn(&guess);
            tracing::debug!(
                model = model.model_name(),
                guess_obj,
                "initial guess supplied, skipping global search"
            );
            (guess_obj, guess)
        }
        None => {
            let cmaes_config = CmaesCanonicalConfig {
                population_size: config.pop_size,
                max_generations: config.max_gen,
                seed: config.cmaes.seed.unwrap_or(123456),
                c1: None,
                c_mu: None,
                c_sigma: None,
                d_sigma: None,
                parallel_eval: config.cmaes.parallel_eval,
                verbosity: config.cmaes.verbosity,
                ipop_restarts: config.cmaes.ipop_restarts,
                ipop_increase_factor: config.cmaes.ipop_increase_factor,
                bipop_restarts: config.cmaes.bipop_restarts,
                total_evals_budget: config.cmaes.total_evals_budget,
                use_subrun_budgeting: config.cmaes.use_subrun_budgeting,
                alpha_mu: None,
                hsig_threshold_factor: None,
                bipop_small_population_factor: None,
                bipop_small_budget_factor: None,
                bipop_large_budget_factor: None,
                bipop_large_pop_increase_factor: None,
                max_bound_iterations: None,
                eig_precision_threshold: None,
                min_eig_value: None,
                matrix_op_threshold: None,
                stagnation_limit: None,
                min_sigma: None,
            };

            let global_obj_fn = |x: &[f64]| model.evaluate_objective(x);
            let cmaes_result =
                canonical_cmaes_optimize(global_obj_fn, bounds, cmaes_config, None);
            let (_, params) = cmaes_result.best_solution;
            let obj = obj_fn(&params);
            tracing::debug!(model = model.model_name(), obj, "CMA-ES global search done");
            (obj, params)
        }
    };

    if !config.cmaes.lbfgsb_enabled {
        return (best_obj, best_sol);
    }
    refine(model, config, best_obj, best_sol)
}

/// L-BFGS-B from `start`, keeping `start` if the refinement does not improve on it.
pub fn local_refine(
    model: &dyn ModelCalibrator,
    config: &OptimizationConfig,
    start: &[f64],
) -> (f64, Vec<f64>) {
    let start = clamp_to_bounds(start, model.param_bounds());
    let start_obj = model.evaluate_objective(&start);
    refine(model, config, start_obj, start)
}

fn refine(
    model: &dyn ModelCalibrator,
    config: &OptimizationConfig,
    best_obj: f64,
    best_sol: Vec<f64>,
) -> (f64, Vec<f64>) {
    let bounds = model.param_bounds();
    let obj_fn = |x: &[f64]| model.evaluate_objective(x);

    let mut refined_solution = best_sol.clone();
    let refine_res = lbfgsb_optimize(
        &mut refined_solution,
        bounds,
        &obj_fn,
        config.cmaes.lbfgsb_max_iterations,
        config.tolerance,
        if config.cmaes.verbosity >= 1 {
            Some(|_current_x: &[f64], current_obj: f64| {
                tracing::trace!(current_obj, "L-BFGS-B iteration");
            })
        } else {
            None
        },
        None,
    );

    match refine_res {
        Ok((loc_obj, loc_sol)) if loc_obj.is_finite() && loc_obj < best_obj => {
            (loc_obj, clamp_to_bounds(&loc_sol, bounds))
        }
        Ok(_) => (best_obj, best_sol),
        Err(e) => {
            tracing::debug!(
                model = model.model_name(),
                error = ?e,
                "L-BFGS-B failed, keeping starting point"
            );
            (best_obj, best_sol)
        }
    }
}

/// Draws `n` points uniformly inside `bounds`. Coordinates listed in `fixed` keep
/// the given value instead of being sampled.
pub fn random_starts<R: Rng>(
    bounds: &[(f64, f64)],
    n: usize,
    fixed: &[(usize, f64)],
    rng: &mut R,
) -> Vec<Vec<f64>> {
    (0..n)
        .map(|_| {
            bounds
                .iter()
                .enumerate()
                .map(|(i, &(lo, hi))| {
                    if let Some(&(_, v)) = fixed.iter().find(|(idx, _)| *idx == i) {
                        v.clamp(lo, hi)
                    } else if hi > lo {
                        rng.gen_range(lo..hi)
                    } else {
                        lo
                    }
                })
                .collect()
        })
        .collect()
}

/// Runs [`local_refine`] from every start and keeps the lowest objective.
pub fn multi_start(
    model: &dyn ModelCalibrator,
    config: &OptimizationConfig,
    starts: &[Vec<f64>],
) -> Option<(f64, Vec<f64>)> {
    let mut best: Option<(f64, Vec<f64>)> = None;
    for (i, start) in starts.iter().enumerate() {
        let (obj, params) = local_refine(model, config, start);
        tracing::trace!(model = model.model_name(), restart = i, obj, "restart finished");
        if best.as_ref().map_or(true, |(b, _)| obj < *b) {
            best = Some((obj, params));
        }
    }
    best
}
