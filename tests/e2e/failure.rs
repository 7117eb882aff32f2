//! A failed step stops the build; fixing it resumes where it left off.

use crate::e2e::*;

/// Compiling a source containing FAIL fails.
#[cfg(unix)]
const PICKY_COMPILE: &str = "command compile = ! grep -q FAIL $in && cp $in $out\n";

#[cfg(unix)]
#[test]
fn failure_stops_the_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.package(
        "",
        &root_arborfile(&format!(
            "{}static-lib bad : bad.c\nstatic-lib good : good.c\n",
            PICKY_COMPILE
        )),
    )?;
    space.write("src/bad.c", "FAIL\n")?;
    space.write("src/good.c", "echo good\n")?;

    let out = space.run_fail(&mut arbor_command(vec!["-j", "1"]))?;
    assert_output_contains(&out, "failed: archive bad");
    assert_output_contains(&out, "arbor: build of bad failed, build stopped");
    assert_output_not_contains(&out, "archive good");
    assert!(!space.exists("obj/libgood.a"));

    // Still failing: nothing was recorded for it.
    let out = space.run_fail(&mut arbor_command(vec!["-j", "1"]))?;
    assert_output_contains(&out, "failed: archive bad");

    space.write("src/bad.c", "echo fixed\n")?;
    let out = space.run_expect(&mut arbor_command(vec!["-j", "1"]))?;
    assert_output_contains(&out, "arbor: ran 2 tasks, now up to date");
    Ok(())
}

#[cfg(unix)]
#[test]
fn dependents_of_a_failure_do_not_run() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.package(
        "",
        &root_arborfile(&format!(
            "{}static-lib core : core.c\nutil-exe tool : tool.c\ndepend tool : core\n",
            PICKY_COMPILE
        )),
    )?;
    space.write("src/core.c", "FAIL\n")?;
    space.write("src/tool.c", "echo tool\n")?;
    let out = space.run_fail(&mut arbor_command(vec!["-j", "4"]))?;
    assert_output_contains(&out, "failed: archive core");
    assert_output_not_contains(&out, "link tool");
    assert!(!space.exists("priv/tool"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn output_not_created_is_a_failure() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.package("", &root_arborfile("command archive = true\nstatic-lib a : a.c\n"))?;
    space.write("src/a.c", "")?;
    let out = space.run_fail(&mut arbor_command(vec![]))?;
    assert_output_contains(&out, "obj/liba.a was not created");
    assert_output_contains(&out, "arbor: build of a failed, build stopped");
    Ok(())
}

#[cfg(unix)]
#[test]
fn missing_source_is_an_error() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.package("", &root_arborfile("static-lib a : a.c\n"))?;
    let out = space.run_fail(&mut arbor_command(vec![]))?;
    assert_output_contains(&out, "arbor: error: a.c: missing source file src/a.c");
    Ok(())
}
