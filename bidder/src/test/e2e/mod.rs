pub mod runtime;

mod test_bid;
