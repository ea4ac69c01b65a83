use kube::CustomResourceExt;

use loadtest_operator::loadtest::LoadTest;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&LoadTest::crd())?);
    Ok(())
}
