// One module per integration area.
mod harness;
mod persistence;
mod pipeline;
mod toggle;
