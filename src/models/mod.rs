mod access_grant;
mod course;
mod invoice;
mod payment;
mod profile;

pub use access_grant::*;
pub use course::*;
pub use invoice::*;
pub use payment::*;
pub use profile::*;
