pub use crate::executor::{JoinHandle, Task};
pub use crate::kernel::{HdlModel, Scope};
pub use crate::shared::TbObj;
pub use crate::signal::{ObjectKind, SimObject};
pub use crate::sim_if::{SimIf, TimeUnit, SIM_IF};
pub use crate::trigger::{EdgeKind, Trigger};
pub use crate::value::Val;
pub use crate::{fail_test, pass_test, run, run_with_model};
pub use crate::{SimConfig, SimError, SimResult, TbError, TbResult, TbTests, Test, TestSummary};
pub use crate::{testbench, utils};
pub use futures::future::FutureExt;
