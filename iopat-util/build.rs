// Copyright (c) Facebook, Inc. and its affiliates.
fn main() -> anyhow::Result<()> {
    vergen::EmitBuilder::builder()
        .cargo_target_triple()
        .emit()
}
