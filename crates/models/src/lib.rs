pub mod errors;
pub mod db;
pub mod file;
pub mod chunk;

#[cfg(test)]
mod tests;
