pub(crate) mod display_change;
