use cronhpa_operator::crd::CronHpa;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    println!("---");
    println!("# CronHorizontalPodAutoscaler CRD");
    println!("{}", serde_yaml::to_string(&CronHpa::crd())?);
    Ok(())
}
