// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use kube::CustomResourceExt;
use s3_operator::types::S3Bucket;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&S3Bucket::crd())?);
    Ok(())
}
