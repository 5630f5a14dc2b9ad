//! Integration tests driving the relay binary against real git repositories

mod helpers;
mod test_apply;
mod test_plan;
