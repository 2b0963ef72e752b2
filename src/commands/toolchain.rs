use crate::commands::{GlobalOptions, Session};
use crate::result::{Result, EXIT_SUCCESS};
use crate::target;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/** Provisions the toolchain for one platform ahead of any build
 *
 * # Notes
 * - Goes through the same provisioner and index as a build, so a later
 *   build of that platform starts from the cached bundle
 */
pub async fn execute_install(options: &GlobalOptions, platform: &str) -> Result<i32> {
    let session = Session::load(options).await?;
    let platform = target::lookup(platform, &session.config.platforms)?;
    let target = platform.descriptor.resolve()?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    spinner.set_message(format!(
        "Provisioning {} toolchain for {}...",
        session.channel, target
    ));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let provisioner = session.provisioner()?;
    let result = provisioner.provision(&session.channel, &target).await;
    spinner.finish_and_clear();
    let bundle = result?;

    println!("Toolchain ready for {} ({})", platform.name, target);
    println!("  Release: {}", bundle.release);
    println!("  Compiler: {}", bundle.compiler.display());
    if options.verbose {
        println!("  Build driver: {}", bundle.build_driver.display());
        println!("  Standard library: {}", bundle.std_lib.display());
    }
    println!("  Identity: {}", bundle.identity);

    Ok(EXIT_SUCCESS)
}
