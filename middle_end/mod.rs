pub mod analysis;
pub mod debugger;
pub mod exec;
pub mod ir;
pub mod oracle;
pub mod outline;
pub mod term;
pub mod wp;
