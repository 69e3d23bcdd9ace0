pub mod appium;
pub mod llm_select;
pub mod server;
