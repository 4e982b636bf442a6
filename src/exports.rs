pub use {adjustp,
         anyhow,
         itertools,
         log,
         nalgebra,
         ndarray,
         num,
         pretty_env_logger,
         rand,
         rand_distr,
         serde,
         serde_json,
         statrs};
