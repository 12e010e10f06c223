pub mod broadcaster;
pub mod completion;
pub mod failure;
pub mod orchestrator;
pub mod reclaimer;
pub mod storage;
pub mod validation;
