
mod env;
mod permissions;
mod records;
