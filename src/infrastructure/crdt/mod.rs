pub mod yrs_adapter;

pub use yrs_adapter::YrsAdapter;
