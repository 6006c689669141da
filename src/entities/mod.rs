pub mod movie;
