pub mod headless;
pub mod session;

pub use headless::{launch_browser, BrowserOptions};
pub use session::BrowserSession;
