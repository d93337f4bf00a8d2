pub mod silent;
