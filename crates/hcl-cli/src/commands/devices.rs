//! Device listing.

use hcl_compute::{Platform, StatusCode, describe_backends, describe_devices, select_best_backend, select_devices};
use hcl_kernels::Config;

/// Prints backends, enumerated devices and the ones the config selects.
pub fn run(config: &Config) -> StatusCode {
    let platform = Platform::new(&config.platform_config());
    println!("Backends:");
    print!("{}", describe_backends(&platform));
    if let Some(backend) = select_best_backend(&platform) {
        println!("Preferred: {backend}");
    }

    println!("\nDevices ({}):", platform.len());
    print!("{}", describe_devices(&platform));

    let selected = select_devices(&platform, config.required_capability.as_deref(), config.gpu_count);
    match selected {
        Ok(devices) => {
            let names: Vec<&str> = devices.iter().map(|d| d.name()).collect();
            println!("\nSelected: {}", names.join(", "));
            StatusCode::SUCCESS
        }
        Err(e) => {
            println!("\nSelected: none ({e})");
            e.status()
        }
    }
}
