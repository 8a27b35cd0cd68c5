pub mod axil;
pub mod config;
pub mod dut;
mod error;
mod executor;
mod junit;
pub mod kernel;
pub mod logger;
pub mod prelude;
pub mod scenario;
mod shared;
mod signal;
pub mod sim_if;
pub mod testbench;
mod trigger;
pub mod uart;
pub mod utils;
mod value;

pub use config::SimConfig;
pub use error::{SimError, TbError};
pub use test::{TbTests, Test, TestFn, TestSummary};
pub use value::Val;

use executor::{JoinHandle, Task};
use kernel::{HdlModel, Scope};
use num_format::{Locale, ToFormattedString};
use prettytable::{Cell, Row, Table};
use shared::TbObj;
use signal::SimObject;
use sim_if::{TimeUnit, SIM_IF};
use std::cell::RefCell;
use std::sync::Arc;
use std::time::Instant;

pub type SimResult<T> = Result<T, SimError>;
pub type TbResult = Result<Val, TbError>;

thread_local! {
    static CURRENT_TEST: RefCell<Option<(Arc<Task>, TbObj<Test>)>> = RefCell::new(None);
}

pub fn pass_test(msg: &str) {
    // Passes test that has not already failed/passed
    finish_test(Ok(Val::String(msg.to_string())));
}

pub fn fail_test(msg: &str) {
    // Fails test that has not already failed/passed
    finish_test(Err(TbError::Failed(msg.to_string())));
}

fn finish_test(result: TbResult) {
    let current = CURRENT_TEST.with(|c| c.borrow_mut().take());
    if let Some((task, test)) = current {
        let sim_time_ns = SIM_IF.get_sim_time(TimeUnit::Ns);
        test.with_mut(|t| {
            match &result {
                Ok(_) => log::info!("Test {} passed", t.name),
                Err(e) => log::error!("Test {} failed: {}", t.name, e),
            }
            t.set_result(result, sim_time_ns);
        });
        tear_down_test(task);
    }
}

fn tear_down_test(test: Arc<Task>) {
    trigger::cancel_all_triggers();
    executor::clear_ready_queue();
    executor::next_epoch();
    test.cancel();
}

fn start_of_simulation(
    tests: &TbTests,
    models: &[Arc<dyn HdlModel>],
) -> SimResult<()> {
    let sim_root = SimObject::get_root()?;

    // All tests are scheduled in a chain at simulation start up by awaiting
    // the previous test completion.
    let mut join_handle: Option<JoinHandle> = None;
    for test in tests.iter().cloned() {
        let models = models.to_vec();
        let previous = join_handle.take();
        join_handle = Some(Task::spawn_persistent(
            async move {
                // await previous test, if there is one
                if let Some(handle) = previous {
                    let _ = handle.await;
                }
                let name = test.get().name.clone();
                log::info!("Running test {}", name);
                let inner = test.clone();
                let test_handle = Task::spawn_from_future(
                    async move {
                        inner.with_mut(|t| t.start(SIM_IF.get_sim_time(TimeUnit::Ns)));
                        for model in &models {
                            model.start(sim_root);
                        }
                        let generator = inner.get().generator;
                        // await test execution
                        let result = (generator)(sim_root).await;
                        finish_test(result);
                        Ok(Val::None)
                    },
                    &name,
                );
                // set current test handle
                if let Some(task) = test_handle.task() {
                    CURRENT_TEST.with(|c| c.borrow_mut().replace((task, test)));
                }
                let _ = test_handle.await;
                Ok(Val::None)
            },
            "test_chain",
        ));
    }
    Ok(())
}

fn summary_table(summaries: &[TestSummary]) -> Table {
    let mut table = Table::new();
    table.set_titles(Row::new(
        ["TEST", "RESULT", "TIME (s)", "SIM TIME (ns)", "SIM SPEED (ns/s)"]
            .iter()
            .map(|s| Cell::new(s))
            .collect(),
    ));
    for s in summaries {
        table.add_row(Row::new(vec![
            Cell::new(&s.name),
            Cell::new(if s.passed { "passed" } else { "failed" }),
            Cell::new(&format!("{:.3}", s.time_secs)),
            Cell::new(&(s.sim_time_ns as u64).to_formatted_string(&Locale::en)),
            Cell::new(&format!("{:.3}", s.sim_speed())),
        ]));
    }
    table
}

fn end_of_simulation(tests: &TbTests, sim_start: Instant) -> Vec<TestSummary> {
    let duration = sim_start.elapsed().as_secs_f64();
    let final_sim_time = SIM_IF.get_sim_time(TimeUnit::Ns);
    let sim_speed = match duration > 0.0 {
        true => final_sim_time / duration,
        false => 0.0,
    };

    let summaries: Vec<TestSummary> = tests
        .iter()
        .map(|t| TestSummary::from_test(&t.get()))
        .collect();

    let table = summary_table(&summaries);
    for line in table.to_string().lines() {
        SIM_IF.log(line);
    }
    let failed = summaries.iter().filter(|s| !s.passed).count();
    SIM_IF.log(&format!(
        "TESTS={} PASS={} FAIL={}",
        summaries.len(),
        summaries.len() - failed,
        failed
    ));
    SIM_IF.log(&format!(
        "Simulation time: {} ns",
        (final_sim_time as u64).to_formatted_string(&Locale::en)
    ));
    SIM_IF.log(&format!("Real time: {:.3} s", duration));
    SIM_IF.log(&format!("Simulation speed: {:.3} ns/s", sim_speed));
    summaries
}

/// Elaborates `models`, runs `tests` one after another and reports the results.
///
/// Everything runs on the calling thread; separate threads run independent
/// simulations.
pub fn run(
    config: &SimConfig,
    models: Vec<Arc<dyn HdlModel>>,
    tests: TbTests,
) -> Result<Vec<TestSummary>, TbError> {
    logger::init(config.log_level);
    trigger::cancel_all_triggers();
    executor::clear_ready_queue();
    executor::next_epoch();
    CURRENT_TEST.with(|c| c.borrow_mut().take());

    kernel::reset(&config.top, config.precision.exponent())?;
    let top = Scope::root()?;
    for model in &models {
        model.elaborate(&top)?;
    }

    let sim_start = Instant::now();
    start_of_simulation(&tests, &models)?;
    if let Err(e) = kernel::run(config.max_deltas) {
        log::error!("Simulation aborted: {}", e);
        finish_test(Err(e.into()));
    }
    // a test still holding CURRENT_TEST ran out of events
    CURRENT_TEST.with(|c| c.borrow_mut().take());

    let summaries = end_of_simulation(&tests, sim_start);
    if let Some(path) = &config.results_file {
        junit::create_junit_xml(path, &config.suite, &summaries)?;
    }
    Ok(summaries)
}

/// Generates `main` for a testbench binary running the given tests against a
/// design model. The exit code is non-zero when a test fails.
#[macro_export]
macro_rules! run_with_model {
    ($model:expr; $( $i:ident ),+ $(,)?) => {
        fn main() -> ::std::process::ExitCode {
            let mut config = match $crate::SimConfig::from_env() {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("{}", e);
                    return ::std::process::ExitCode::FAILURE;
                }
            };
            config.suite = ::std::module_path!().to_string();
            // add tests to execution vector
            let mut tests = $crate::TbTests::new();
            $(tests.push($crate::Test::new(stringify!($i).to_string(), |dut| {
                $crate::prelude::FutureExt::boxed($i(dut))
            }));)+
            let models: Vec<::std::sync::Arc<dyn $crate::kernel::HdlModel>> =
                vec![::std::sync::Arc::new($model)];
            match $crate::run(&config, models, tests) {
                Ok(summaries) if summaries.iter().all(|s| s.passed) => {
                    ::std::process::ExitCode::SUCCESS
                }
                Ok(_) => ::std::process::ExitCode::FAILURE,
                Err(e) => {
                    eprintln!("{}", e);
                    ::std::process::ExitCode::FAILURE
                }
            }
        }
    };
}
