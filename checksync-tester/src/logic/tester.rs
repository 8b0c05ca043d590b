use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::scenarios::Scenario;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_name: String,
    pub seed: u64,
    pub passed: bool,
    pub iterations_run: usize,
    pub successful_iterations: usize,
    pub failures: Vec<String>,
    #[serde(with = "duration_serde")]
    pub average_duration: Duration,
    #[serde(with = "duration_vec_serde")]
    pub performance_data: Vec<Duration>,
}

pub struct LogicTester {
    verbose: bool,
}

impl LogicTester {
    pub const fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Run `scenario` for every seed, one blocking task per seed.
    pub async fn run_scenario(
        &self,
        scenario: Scenario,
        seeds: &[u64],
        iterations: usize,
    ) -> Vec<ScenarioResult> {
        let tasks: Vec<_> = seeds
            .iter()
            .map(|&seed| {
                if self.verbose {
                    println!(
                        "🧪 Testing scenario: {} (seed: {seed})",
                        scenario.name.bright_white()
                    );
                }
                let verbose = self.verbose;
                let task = tokio::task::spawn_blocking(move || {
                    run_single_scenario(scenario, seed, iterations, verbose)
                });
                (seed, task)
            })
            .collect();

        let mut results = Vec::with_capacity(tasks.len());
        for (seed, task) in tasks {
            let result = task.await.unwrap_or_else(|err| ScenarioResult {
                scenario_name: scenario.name.to_string(),
                seed,
                passed: false,
                iterations_run: iterations,
                successful_iterations: 0,
                failures: vec![format!("scenario task aborted: {err}")],
                average_duration: Duration::ZERO,
                performance_data: Vec::new(),
            });
            results.push(result);
        }
        results
    }
}

fn run_single_scenario(
    scenario: Scenario,
    seed: u64,
    iterations: usize,
    verbose: bool,
) -> ScenarioResult {
    let mut successes = 0;
    let mut failures = Vec::new();
    let mut performance_data = Vec::new();

    for i in 0..iterations {
        let start_time = Instant::now();
        let iteration_seed = seed.wrapping_add(u64::try_from(i).unwrap_or(u64::MAX));

        match scenario.run(iteration_seed) {
            Ok(()) => {
                successes += 1;
                let duration = start_time.elapsed();
                performance_data.push(duration);
                if verbose {
                    println!(
                        "  ✅ Iteration {}/{} passed ({duration:?}) seed:{iteration_seed}",
                        i + 1,
                        iterations
                    );
                }
            }
            Err(err) => {
                let message = format!("Iteration {} (seed {iteration_seed}): {err:#}", i + 1);
                if verbose {
                    println!(
                        "  ❌ Iteration {}/{} failed: {}",
                        i + 1,
                        iterations,
                        format!("{err:#}").red()
                    );
                }
                failures.push(message);
            }
        }
    }

    let average_duration = if performance_data.is_empty() {
        Duration::ZERO
    } else {
        performance_data.iter().sum::<Duration>()
            / u32::try_from(performance_data.len()).unwrap_or(1)
    };

    ScenarioResult {
        scenario_name: scenario.name.to_string(),
        seed,
        passed: failures.is_empty(),
        iterations_run: iterations,
        successful_iterations: successes,
        failures,
        average_duration,
        performance_data,
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_micros().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let micros = u128::deserialize(deserializer)?;
        Ok(Duration::from_micros(u64::try_from(micros).unwrap_or(0)))
    }
}

mod duration_vec_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(durations: &[Duration], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let micros: Vec<u128> = durations.iter().map(Duration::as_micros).collect();
        micros.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let micros = Vec::<u128>::deserialize(deserializer)?;
        Ok(micros
            .into_iter()
            .map(|m| Duration::from_micros(u64::try_from(m).unwrap_or(0)))
            .collect())
    }
}
