//! # FaceMed
//!
//! 汇总导出各子 crate，便于演示程序和外部使用者依赖单一入口。

pub use facemed_client as client;
pub use facemed_core as domain;
pub use facemed_workflow as workflow;

pub use facemed_workflow::FacemedApp;
