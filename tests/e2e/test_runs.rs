//! Test executables run after they build, and again only when they change.

use crate::e2e::*;

#[cfg(unix)]
#[test]
fn tests_run_once() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.package("", &root_arborfile("contain check\n"))?;
    space.package("check", "test-exe t : t.c\n")?;
    space.write(
        "src/check/t.c",
        "test -d \"$TEST_TMPDIR\" && touch \"$TEST_TMPDIR/marker\"\n\
         echo ran >> runs.log\n",
    )?;

    let out = space.run_expect(&mut arbor_command(vec![]))?;
    assert_output_contains(&out, "link check/t");
    assert_output_contains(&out, "test check/t");
    assert_output_contains(&out, "arbor: ran 2 tasks, now up to date");
    assert!(space.exists("priv/check/t-tmp/marker"));

    let out = space.run_expect(&mut arbor_command(vec![]))?;
    assert_eq!(std::str::from_utf8(&out.stdout)?, "arbor: no work to do\n");
    assert_eq!(space.read("runs.log")?, b"ran\n");
    Ok(())
}

#[cfg(unix)]
#[test]
fn failing_test_runs_until_fixed() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.package("", &root_arborfile("test-exe t : t.c\n"))?;
    space.write("src/t.c", "echo broken\nexit 1\n")?;

    let out = space.run_fail(&mut arbor_command(vec![]))?;
    assert_output_contains(&out, "failed: test t");
    assert_output_contains(&out, "broken");
    assert_output_contains(&out, "arbor: run of t failed, build stopped");

    // The executable is current, the test is not.
    let out = space.run_fail(&mut arbor_command(vec![]))?;
    assert_output_not_contains(&out, "link t");
    assert_output_contains(&out, "failed: test t");

    space.write("src/t.c", "exit 0\n")?;
    let out = space.run_expect(&mut arbor_command(vec![]))?;
    assert_output_contains(&out, "arbor: ran 2 tasks, now up to date");
    Ok(())
}
