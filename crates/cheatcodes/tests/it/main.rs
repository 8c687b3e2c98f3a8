mod broadcast;
mod env;
mod fork;
mod mock;
mod prank;
mod record;
mod state_diff;
mod test_helpers;
