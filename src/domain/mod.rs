// Domain layer: entities, backend row mapping and ports (interfaces).

pub mod model;
pub mod ports;
pub mod rows;
