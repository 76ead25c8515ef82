//! End-to-end tests: the real TCP transport against an in-process mock
//! control-plane cluster.


#[cfg(test)]
mod fanout;
#[cfg(test)]
mod faults;
#[cfg(test)]
mod redirect;
