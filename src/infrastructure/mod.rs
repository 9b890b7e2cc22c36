//! 基础设施层
//!
//! 持有稀缺资源（Page、键值存储），只暴露能力

pub mod js_executor;
pub mod kv_store;
pub mod locator;
pub mod page_driver;

pub use js_executor::JsExecutor;
pub use kv_store::{KvStore, MemoryKvStore};
pub use locator::{locate_first_visible, ElementRef, Locator};
pub use page_driver::{ChromeDriver, PageDriver};
