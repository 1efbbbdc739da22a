pub mod authentication;
pub mod gate;
pub mod permissions;
pub mod principal;
pub mod resolver;
pub mod token;

pub use authentication::*;
pub use gate::*;
pub use permissions::*;
pub use principal::*;
pub use resolver::*;
pub use token::*;
