pub mod mask_metric;
