pub mod countries;
pub mod traits;

pub use countries::CountryProjection;
pub use traits::Transform;
