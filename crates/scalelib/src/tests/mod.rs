#[cfg(test)]
mod test_demand;

pub mod utils;
